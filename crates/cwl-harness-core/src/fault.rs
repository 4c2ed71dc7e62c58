//! Scoped fault injection through executable resolution.
//!
//! A [`FaultInjector`] makes a tool name resolve to a different, present
//! binary by placing symlinks in a shim directory and putting that directory
//! first on `PATH`. `PATH` is process-wide, so acquisition takes the write
//! side of a global lock and the returned [`FaultGuard`] restores the
//! original value and removes the shims on every exit path, including
//! unwinding. Runs that need the unmodified `PATH` hold a [`PathHold`],
//! the read side, for as long as they execute.

use std::collections::BTreeMap;
use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};
use crate::obs;

const PATH_VAR: &str = "PATH";

fn path_lock() -> Arc<RwLock<()>> {
    static LOCK: OnceLock<Arc<RwLock<()>>> = OnceLock::new();
    LOCK.get_or_init(|| Arc::new(RwLock::new(()))).clone()
}

/// Shared hold on the unmodified `PATH`; no fault can be installed while
/// any hold is alive.
#[derive(Debug)]
pub struct PathHold {
    _lock: OwnedRwLockReadGuard<()>,
}

/// Wait until no fault is installed, then keep it that way until the
/// returned hold is dropped.
pub async fn hold_path() -> PathHold {
    PathHold {
        _lock: path_lock().read_owned().await,
    }
}

/// Every `PATH` entry that contains `name`, in search order.
pub fn candidates_on_path(name: &str, path_var: &OsStr) -> Vec<PathBuf> {
    env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .filter(|candidate| candidate.is_file())
        .collect()
}

/// What `name` resolves to on the given search path.
pub fn resolve_on_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    candidates_on_path(name, path_var).into_iter().next()
}

/// What `name` resolves to on the current process `PATH`.
pub fn resolve_tool(name: &str) -> Option<PathBuf> {
    env::var_os(PATH_VAR).and_then(|p| resolve_on_path(name, &p))
}

/// The last `PATH` entry providing `name`, used to pick a substitute binary.
pub fn last_on_path(name: &str) -> Option<PathBuf> {
    env::var_os(PATH_VAR).and_then(|p| candidates_on_path(name, &p).pop())
}

/// One tool name redirected to a substitute binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSubstitution {
    pub tool: String,
    pub substitute: PathBuf,
}

impl ToolSubstitution {
    pub fn new(tool: impl Into<String>, substitute: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            substitute: substitute.into(),
        }
    }
}

/// Builder for a scoped executable-resolution fault.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    shim_dir: PathBuf,
    substitutions: BTreeMap<String, PathBuf>,
}

impl FaultInjector {
    pub fn new(shim_dir: impl Into<PathBuf>) -> Self {
        Self {
            shim_dir: shim_dir.into(),
            substitutions: BTreeMap::new(),
        }
    }

    pub fn substitute(mut self, substitution: ToolSubstitution) -> Self {
        self.substitutions
            .insert(substitution.tool, substitution.substitute);
        self
    }

    /// Install the substitutions and take ownership of `PATH` until the
    /// guard is released or dropped.
    ///
    /// Waits while another trial holds a fault or a [`PathHold`].
    pub async fn acquire(self) -> HarnessResult<FaultGuard> {
        let lock = path_lock().write_owned().await;

        for (tool, substitute) in &self.substitutions {
            if !substitute.exists() {
                return Err(HarnessError::FaultInjection(format!(
                    "substitute for '{tool}' does not exist: {}",
                    substitute.display()
                )));
            }
        }

        std::fs::create_dir_all(&self.shim_dir)?;
        let mut shims = Vec::with_capacity(self.substitutions.len());
        for (tool, substitute) in &self.substitutions {
            let shim = self.shim_dir.join(tool);
            if shim.symlink_metadata().is_ok() {
                std::fs::remove_file(&shim)?;
            }
            if let Err(e) = link(substitute, &shim) {
                remove_shims(&shims);
                return Err(e);
            }
            debug!(tool = %tool, substitute = %substitute.display(), "Installed shim");
            shims.push(shim);
        }

        let original = env::var_os(PATH_VAR);
        let mut dirs = vec![self.shim_dir.clone()];
        if let Some(path) = &original {
            dirs.extend(env::split_paths(path));
        }
        let patched = match env::join_paths(dirs) {
            Ok(p) => p,
            Err(e) => {
                remove_shims(&shims);
                return Err(HarnessError::FaultInjection(format!(
                    "cannot prepend {} to PATH: {e}",
                    self.shim_dir.display()
                )));
            }
        };
        env::set_var(PATH_VAR, &patched);
        info!(
            event = "fault.installed",
            shim_dir = %self.shim_dir.display(),
            tools = ?self.substitutions.keys().collect::<Vec<_>>(),
        );

        Ok(FaultGuard {
            original,
            shims,
            restored: false,
            _lock: lock,
        })
    }
}

/// Holds a fault in place; restores `PATH` and removes shims when released.
#[derive(Debug)]
pub struct FaultGuard {
    original: Option<OsString>,
    shims: Vec<PathBuf>,
    restored: bool,
    _lock: OwnedRwLockWriteGuard<()>,
}

impl FaultGuard {
    /// Shim paths currently installed.
    pub fn shims(&self) -> &[PathBuf] {
        &self.shims
    }

    /// Undo the fault now and let the next trial in.
    pub fn release(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        if self.restored {
            return;
        }
        match &self.original {
            Some(path) => env::set_var(PATH_VAR, path),
            None => env::remove_var(PATH_VAR),
        }
        remove_shims(&self.shims);
        self.restored = true;
        info!(event = "fault.restored");
    }
}

impl Drop for FaultGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

fn remove_shims(shims: &[PathBuf]) {
    for shim in shims {
        if let Err(e) = std::fs::remove_file(shim) {
            obs::emit_fault_restore_error(&format!("{}: {e}", shim.display()));
        }
    }
}

#[cfg(unix)]
fn link(target: &Path, shim: &Path) -> HarnessResult<()> {
    std::os::unix::fs::symlink(target, shim)?;
    Ok(())
}

#[cfg(not(unix))]
fn link(target: &Path, _shim: &Path) -> HarnessResult<()> {
    Err(HarnessError::FaultInjection(format!(
        "symlink shims are not supported on this platform ({})",
        target.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_path(dir: &Path) -> bool {
        env::var_os(PATH_VAR).is_some_and(|p| env::split_paths(&p).any(|d| d == dir))
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, "#!/bin/sh\n").unwrap();
        p
    }

    #[test]
    fn test_resolve_on_explicit_path() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        touch(a.path(), "rev");
        touch(b.path(), "rev");
        touch(b.path(), "date");

        let path = env::join_paths([a.path(), b.path()]).unwrap();
        assert_eq!(resolve_on_path("rev", &path), Some(a.path().join("rev")));
        assert_eq!(resolve_on_path("date", &path), Some(b.path().join("date")));
        assert_eq!(resolve_on_path("sort", &path), None);
        assert_eq!(
            candidates_on_path("rev", &path),
            vec![a.path().join("rev"), b.path().join("rev")]
        );
    }

    #[test]
    fn test_directories_do_not_resolve() {
        let a = tempfile::tempdir().unwrap();
        std::fs::create_dir(a.path().join("rev")).unwrap();
        let path = env::join_paths([a.path()]).unwrap();
        assert_eq!(resolve_on_path("rev", &path), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_guard_restores_path_and_removes_shims() {
        let bin = tempfile::tempdir().unwrap();
        let substitute = touch(bin.path(), "not-rev");
        let shim_dir = tempfile::tempdir().unwrap();
        let tool = "cwl-harness-fault-test-tool";

        let guard = FaultInjector::new(shim_dir.path())
            .substitute(ToolSubstitution::new(tool, &substitute))
            .acquire()
            .await
            .unwrap();

        let resolved = resolve_tool(tool).expect("shim should resolve");
        assert_eq!(resolved, shim_dir.path().join(tool));
        assert_eq!(
            std::fs::canonicalize(&resolved).unwrap(),
            std::fs::canonicalize(&substitute).unwrap()
        );
        assert_eq!(guard.shims().len(), 1);
        assert!(on_path(shim_dir.path()));

        guard.release();
        assert!(!on_path(shim_dir.path()));
        assert!(resolve_tool(tool).is_none());
        assert!(!shim_dir.path().join(tool).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_guard_restores_on_panic() {
        let bin = tempfile::tempdir().unwrap();
        let substitute = touch(bin.path(), "not-rev");
        let shim_dir = tempfile::tempdir().unwrap();
        let shim_path = shim_dir.path().to_path_buf();

        let guard = FaultInjector::new(&shim_path)
            .substitute(ToolSubstitution::new("cwl-harness-panic-tool", &substitute))
            .acquire()
            .await
            .unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = guard;
            panic!("assertion failed inside trial");
        }));
        assert!(result.is_err());
        assert!(!on_path(&shim_path));
        assert!(!shim_path.join("cwl-harness-panic-tool").exists());
    }

    #[tokio::test]
    async fn test_missing_substitute_rejected() {
        let shim_dir = tempfile::tempdir().unwrap();
        let err = FaultInjector::new(shim_dir.path())
            .substitute(ToolSubstitution::new("rev", "/nonexistent/cwl-harness/date"))
            .acquire()
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::FaultInjection(_)));
        assert!(!on_path(shim_dir.path()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_faults_are_serialized() {
        let bin = tempfile::tempdir().unwrap();
        let substitute = touch(bin.path(), "not-rev");
        let shim_a = tempfile::tempdir().unwrap();
        let shim_b = tempfile::tempdir().unwrap();

        let first = FaultInjector::new(shim_a.path())
            .substitute(ToolSubstitution::new("cwl-harness-serial-a", &substitute))
            .acquire()
            .await
            .unwrap();

        let second = FaultInjector::new(shim_b.path())
            .substitute(ToolSubstitution::new("cwl-harness-serial-b", &substitute));
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(50), second.clone().acquire())
                .await;
        assert!(pending.is_err(), "second fault must wait for the first");

        first.release();
        let second = second.acquire().await.unwrap();
        assert!(resolve_tool("cwl-harness-serial-b").is_some());
        assert!(resolve_tool("cwl-harness-serial-a").is_none());
        second.release();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hold_blocks_faults_until_dropped() {
        let bin = tempfile::tempdir().unwrap();
        let substitute = touch(bin.path(), "not-rev");
        let shim_dir = tempfile::tempdir().unwrap();
        let tool = "cwl-harness-hold-tool";

        let hold = hold_path().await;

        let fault = FaultInjector::new(shim_dir.path())
            .substitute(ToolSubstitution::new(tool, &substitute));
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(50), fault.clone().acquire())
                .await;
        assert!(pending.is_err(), "fault must wait for the hold");
        assert!(resolve_tool(tool).is_none());

        drop(hold);
        let guard = fault.acquire().await.unwrap();
        assert!(resolve_tool(tool).is_some());

        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), hold_path()).await;
        assert!(blocked.is_err(), "hold must wait for the fault");
        guard.release();
        drop(hold_path().await);
    }
}
