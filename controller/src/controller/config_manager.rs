use crate::protocol::{ConfigMap, RunnerId};
use std::collections::HashMap;

/// Environment variables with this prefix seed the runner config
pub const ENV_CONFIG_PREFIX: &str = "MITE_CONF_";

/// Versioned key/value config pushed to runners
///
/// Each runner only receives the entries that changed since its last fetch.
#[derive(Debug, Default)]
pub struct ConfigManager {
    version: u64,
    entries: HashMap<String, (String, u64)>,
    runner_versions: HashMap<RunnerId, u64>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from `MITE_CONF_*` environment variables
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut manager = Self::new();
        for (key, value) in vars {
            if let Some(key) = key.strip_prefix(ENV_CONFIG_PREFIX)
                && !key.is_empty()
            {
                manager.set(key, value);
            }
        }
        manager
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.version += 1;
        self.entries
            .insert(key.into(), (value.into(), self.version));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|(value, _)| value.as_str())
    }

    /// Entries changed since the runner last asked
    pub fn changes_for_runner(&mut self, runner_id: RunnerId) -> ConfigMap {
        let seen = self.runner_versions.get(&runner_id).copied().unwrap_or(0);
        let changes = self
            .entries
            .iter()
            .filter(|(_, (_, version))| *version > seen)
            .map(|(key, (value, _))| (key.clone(), value.clone()))
            .collect();
        self.runner_versions.insert(runner_id, self.version);
        changes
    }

    pub fn remove_runner(&mut self, runner_id: RunnerId) {
        self.runner_versions.remove(&runner_id);
    }
}
