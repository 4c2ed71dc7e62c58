//! Per-trial working directories.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;

use crate::error::HarnessResult;

/// Isolated output directory and job-store location for one trial.
///
/// The job store path is unique to this workspace and is never created by
/// the harness: the runner owns it. Everything is removed on drop.
#[derive(Debug)]
pub struct TrialWorkspace {
    trial_id: Uuid,
    root: TempDir,
    out_dir: PathBuf,
    job_store: PathBuf,
}

impl TrialWorkspace {
    /// Create a fresh workspace under `work_root`.
    pub fn create(work_root: &Path) -> HarnessResult<Self> {
        std::fs::create_dir_all(work_root)?;
        let trial_id = Uuid::new_v4();
        let root = tempfile::Builder::new()
            .prefix(&format!("cwl-harness-{trial_id}-"))
            .tempdir_in(work_root)?;

        let out_dir = root.path().join("out");
        std::fs::create_dir(&out_dir)?;
        let job_store = root.path().join("jobStore");

        Ok(Self {
            trial_id,
            root,
            out_dir,
            job_store,
        })
    }

    pub fn trial_id(&self) -> Uuid {
        self.trial_id
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn job_store(&self) -> &Path {
        &self.job_store
    }

    /// Directory for substitute executables installed by fault injection.
    pub fn shim_dir(&self) -> PathBuf {
        self.root.path().join("shims")
    }

    /// Keep the directory on disk after drop, returning its path.
    pub fn persist(self) -> PathBuf {
        self.root.into_path()
    }
}
