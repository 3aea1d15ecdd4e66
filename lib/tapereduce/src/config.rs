use crate::constants::{DEFAULT_WORKDIR, ENV_KEEP_INTERMEDIATES, ENV_MAPPERS, ENV_REDUCERS, ENV_WORKDIR};
use crate::error::ConfigError;
use crate::utils::{env_var_truthy, env_var_usize};
use serde::Serialize;
use std::path::PathBuf;

/// How the shuffle decides when to stop reading mapper files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ShufflePolicy {
    /// Read one record from every live mapper file per round until the largest
    /// file (by bytes) is exhausted, then drain what has been accumulated.
    /// Records still unread in other files at that point are not shuffled.
    #[default]
    Paced,
    /// Keep reading rounds until every mapper file is exhausted.
    DrainAll,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub mappers: usize,
    pub reducers: usize,
    pub workspace_root: PathBuf,
    pub keep_intermediates: bool,
    pub shuffle_policy: ShufflePolicy,
}

impl EngineConfig {
    pub fn new(mappers: usize, reducers: usize) -> Self {
        Self {
            mappers,
            reducers,
            workspace_root: PathBuf::from(DEFAULT_WORKDIR),
            keep_intermediates: false,
            shuffle_policy: ShufflePolicy::default(),
        }
    }

    /// Worker counts default to the number of CPUs.
    pub fn from_env() -> Self {
        let cpus = num_cpus::get().max(1);
        let mut cfg = Self::new(
            env_var_usize(ENV_MAPPERS).unwrap_or(cpus),
            env_var_usize(ENV_REDUCERS).unwrap_or(cpus),
        );
        if let Ok(dir) = std::env::var(ENV_WORKDIR) {
            if !dir.is_empty() { cfg.workspace_root = PathBuf::from(dir); }
        }
        cfg.keep_intermediates = env_var_truthy(ENV_KEEP_INTERMEDIATES);
        cfg
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_keep_intermediates(mut self, keep: bool) -> Self {
        self.keep_intermediates = keep;
        self
    }

    pub fn with_shuffle_policy(mut self, policy: ShufflePolicy) -> Self {
        self.shuffle_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mappers == 0 { return Err(ConfigError::ZeroWorkers("mapper")); }
        if self.reducers == 0 { return Err(ConfigError::ZeroWorkers("reducer")); }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = EngineConfig::new(2, 3);
        assert_eq!(cfg.workspace_root, PathBuf::from(DEFAULT_WORKDIR));
        assert!(!cfg.keep_intermediates);
        assert_eq!(cfg.shuffle_policy, ShufflePolicy::Paced);
        assert!(cfg.validate().is_ok());
    }

    // the only test touching these variables
    #[test]
    fn env_overrides() {
        std::env::set_var(ENV_MAPPERS, "3");
        std::env::set_var(ENV_REDUCERS, "5");
        std::env::set_var(ENV_WORKDIR, "/tmp/tapereduce-env-test");
        std::env::set_var(ENV_KEEP_INTERMEDIATES, "yes");
        let cfg = EngineConfig::from_env();
        for name in [ENV_MAPPERS, ENV_REDUCERS, ENV_WORKDIR, ENV_KEEP_INTERMEDIATES] { std::env::remove_var(name); }
        assert_eq!((cfg.mappers, cfg.reducers), (3, 5));
        assert_eq!(cfg.workspace_root, PathBuf::from("/tmp/tapereduce-env-test"));
        assert!(cfg.keep_intermediates);
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(matches!(EngineConfig::new(0, 1).validate(), Err(ConfigError::ZeroWorkers("mapper"))));
        assert!(matches!(EngineConfig::new(1, 0).validate(), Err(ConfigError::ZeroWorkers("reducer"))));
    }
}
