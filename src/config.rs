use std::path::PathBuf;
use thiserror::Error;

/// Where the execution history lives relative to the invocation directory.
pub const DEFAULT_HISTORY_DIR: &str = ".drydock/history";

/// How many task records the history store keeps before evicting the oldest.
pub const DEFAULT_MAX_HISTORY_ENTRIES: usize = 10_000;

/// A collection of options that affect how the engine persists and compares task
/// history. This is not specific to one task; it relates to the whole build.
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(error = "ConfigError"))]
pub struct Config {
    /// The directory the build was invoked from.
    #[builder(default = "self.default_invocation_dir()?")]
    invocation_dir: PathBuf,

    /// The root of the persistent history store.
    #[builder(default = "self.default_store_root()?")]
    store_root: PathBuf,

    /// Upper bound on persisted task records before the oldest are evicted.
    #[builder(default = "DEFAULT_MAX_HISTORY_ENTRIES")]
    max_history_entries: usize,

    /// Keep a process-local copy of store entries to skip repeated disk reads.
    #[builder(default = "false")]
    cache_in_memory: bool,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn invocation_dir(&self) -> &PathBuf {
        &self.invocation_dir
    }

    pub fn store_root(&self) -> &PathBuf {
        &self.store_root
    }

    pub fn max_history_entries(&self) -> usize {
        self.max_history_entries
    }

    pub fn cache_in_memory(&self) -> bool {
        self.cache_in_memory
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build().unwrap()
    }
}

impl ConfigBuilder {
    fn default_invocation_dir(&self) -> Result<PathBuf, ConfigError> {
        std::env::current_dir().map_err(|err| ConfigError::CouldNotFindInvocationDir { err })
    }

    fn default_store_root(&self) -> Result<PathBuf, ConfigError> {
        let invocation_dir = match &self.invocation_dir {
            Some(dir) => dir.clone(),
            None => self.default_invocation_dir()?,
        };
        Ok(invocation_dir.join(DEFAULT_HISTORY_DIR))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    BuilderError(derive_builder::UninitializedFieldError),

    #[error("Could not find the invocation directory due to {err:?}")]
    CouldNotFindInvocationDir { err: std::io::Error },
}

impl From<derive_builder::UninitializedFieldError> for ConfigError {
    fn from(value: derive_builder::UninitializedFieldError) -> Self {
        ConfigError::BuilderError(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_derived_from_the_invocation_dir() {
        let config = Config::builder()
            .invocation_dir(PathBuf::from("/work/project"))
            .build()
            .unwrap();

        assert_eq!(
            config.store_root(),
            &PathBuf::from("/work/project").join(DEFAULT_HISTORY_DIR)
        );
        assert_eq!(config.max_history_entries(), DEFAULT_MAX_HISTORY_ENTRIES);
        assert!(!config.cache_in_memory());
    }

    #[test]
    fn an_explicit_store_root_wins() {
        let config = Config::builder()
            .invocation_dir(PathBuf::from("/work/project"))
            .store_root(PathBuf::from("/var/cache/drydock"))
            .build()
            .unwrap();

        assert_eq!(config.store_root(), &PathBuf::from("/var/cache/drydock"));
    }
}
