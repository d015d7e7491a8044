//! Scenarios: a journey, an optional datapool and a volume model
//!
//! This module provides:
//! - `VolumeModel` and the constant/ramp models scenario modules use
//! - `Datapool` implementations for per-iteration data
//! - `ScenarioCatalog` resolving `module:function` scenario specs
//! - `ScenarioManager` turning volume models into required work

pub mod catalog;
pub mod datapool;
pub mod file;
pub mod manager;
pub mod volume;

pub use catalog::{ScenarioCatalog, ScenarioFn};
pub use datapool::{DataItem, Datapool, DatapoolExhausted, IterableDatapool, RecyclableDatapool};
pub use manager::{ScenarioManager, ScenarioManagerConfig, remove_a_from_b};
pub use volume::{
    ConstantVolume, DEFAULT_VOLUME_DURATION_SECS, RampVolume, SharedVolumeModel, StopVolumeModel,
    VolumeModel, volume_model_factory,
};

use crate::journey::JourneyRegistry;
use std::fmt;
use thiserror::Error;

/// Scenario loading errors
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Invalid scenario spec {0:?}, expected module:function or a .json file")]
    InvalidSpec(String),

    #[error("Scenario module not found: {0}")]
    ModuleNotFound(String),

    #[error("Scenario function {function} not found in module {module}")]
    FunctionNotFound { module: String, function: String },

    #[error("Scenario references unknown journey: {0}")]
    UnknownJourney(String),

    #[error("Failed to read scenario file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse scenario file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One item yielded by a scenario function
pub struct ScenarioDefinition {
    pub journey: String,
    pub datapool: Option<Box<dyn Datapool>>,
    pub volume_model: SharedVolumeModel,
}

impl fmt::Debug for ScenarioDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioDefinition")
            .field("journey", &self.journey)
            .field("datapool", &self.datapool.is_some())
            .field("volume_model", &self.volume_model.name())
            .finish()
    }
}

/// Resolve a scenario spec into its scenario definitions
///
/// Every journey the scenarios reference must be present in `journeys`.
pub fn load_scenarios(
    spec: &str,
    catalog: &ScenarioCatalog,
    journeys: &JourneyRegistry,
) -> Result<Vec<ScenarioDefinition>, ScenarioError> {
    let scenarios: Vec<ScenarioDefinition> = if spec.ends_with(".json") {
        file::ScenarioFile::load(spec)?.into_definitions()
    } else {
        let scenario = catalog.resolve(spec)?;
        scenario().collect()
    };

    if let Some(missing) = scenarios.iter().find(|s| !journeys.contains(&s.journey)) {
        return Err(ScenarioError::UnknownJourney(missing.journey.clone()));
    }

    Ok(scenarios)
}
