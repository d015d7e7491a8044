//! Journeys: named units of simulated user work
//!
//! This module provides:
//! - `Journey` trait implemented by every unit of work a runner can execute
//! - `JourneyContext` handed to each execution
//! - `JourneyRegistry` resolving `module:name` journey specs

mod builtin;

pub use builtin::SleepJourney;

use crate::scenario::DataItem;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Journey execution errors
#[derive(Debug, Error)]
pub enum JourneyError {
    #[error("Journey not found: {0}")]
    NotFound(String),

    #[error("Journey failed: {0}")]
    Failed(String),
}

/// Everything a single journey execution gets to see
#[derive(Debug, Clone, Default)]
pub struct JourneyContext {
    pub runner_id: u64,
    pub journey: String,
    pub data: Option<DataItem>,
    pub config: HashMap<String, String>,
}

/// A named unit of simulated user work
#[async_trait]
pub trait Journey: Send + Sync {
    async fn run(&self, ctx: &JourneyContext) -> Result<(), JourneyError>;
}

/// Maps `module:name` journey specs to implementations
#[derive(Clone, Default)]
pub struct JourneyRegistry {
    journeys: HashMap<String, Arc<dyn Journey>>,
}

impl JourneyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the journeys compiled into this binary
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("t:j", Arc::new(SleepJourney::default()));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, journey: Arc<dyn Journey>) {
        self.journeys.insert(name.into(), journey);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Journey>, JourneyError> {
        self.journeys
            .get(name)
            .cloned()
            .ok_or_else(|| JourneyError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.journeys.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.journeys.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_resolves_t_j() {
        let registry = JourneyRegistry::builtin();
        assert!(registry.contains("t:j"));
        assert!(registry.get("t:j").is_ok());
        assert_eq!(registry.names(), vec!["t:j"]);
    }

    #[test]
    fn test_unknown_journey() {
        let registry = JourneyRegistry::builtin();
        let err = registry.get("t:missing").err().unwrap();
        assert!(matches!(err, JourneyError::NotFound(name) if name == "t:missing"));
    }
}
