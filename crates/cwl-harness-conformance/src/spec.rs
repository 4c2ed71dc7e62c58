//! Conformance run identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::suite::SuiteConfig;

/// Stable identity of one suite configuration.
///
/// Two runs with the same digest executed the same command line against the
/// same runner, so their transcripts are directly comparable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuiteSpec {
    /// Suite name.
    pub suite_name: String,

    /// Runner under test.
    pub runner: String,

    /// SHA-256 digest of the ordered command line.
    pub command_digest: String,
}

impl SuiteSpec {
    pub fn new(config: &SuiteConfig) -> Self {
        Self {
            suite_name: config.name.clone(),
            runner: config.runner.clone(),
            command_digest: compute_command_digest(&config.command()),
        }
    }

    /// Short form used in log lines.
    pub fn short_digest(&self) -> &str {
        &self.command_digest[..12.min(self.command_digest.len())]
    }
}

/// Compute deterministic digest of ordered command arguments.
fn compute_command_digest(command: &[String]) -> String {
    let mut hasher = Sha256::new();
    for arg in command {
        hasher.update(arg.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::{BatchSystem, BuiltinSuite};
    use cwl_harness_core::HarnessConfig;
    use std::path::Path;

    fn suite() -> SuiteConfig {
        SuiteConfig::from_builtin(BuiltinSuite::V1_1, Path::new("/spec_v11"), &HarnessConfig::default())
    }

    #[test]
    fn test_suite_spec_new() {
        let spec = SuiteSpec::new(&suite());
        assert_eq!(spec.suite_name, "cwl_v1.1");
        assert_eq!(spec.runner, "toil-cwl-runner");
        assert_eq!(spec.command_digest.len(), 64);
        assert_eq!(spec.short_digest().len(), 12);
    }

    #[test]
    fn test_command_digest_deterministic() {
        assert_eq!(SuiteSpec::new(&suite()), SuiteSpec::new(&suite()));
    }

    #[test]
    fn test_command_digest_tracks_configuration() {
        let plain = SuiteSpec::new(&suite());
        let slurm = SuiteSpec::new(&suite().with_batch_system(BatchSystem::Slurm));
        let cached = SuiteSpec::new(&suite().with_caching(true));
        assert_ne!(plain.command_digest, slurm.command_digest);
        assert_ne!(plain.command_digest, cached.command_digest);
    }

    #[test]
    fn test_command_digest_order_sensitive() {
        let a = compute_command_digest(&["-n=1".to_string(), "--".to_string()]);
        let b = compute_command_digest(&["--".to_string(), "-n=1".to_string()]);
        assert_ne!(a, b);
    }
}
