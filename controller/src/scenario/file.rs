//! JSON scenario files
//!
//! ```json
//! {
//!   "scenarios": [
//!     { "volume": 10, "journey": "t:j", "duration_secs": 3600 },
//!     { "volume": 5, "journey": "t:j", "ramp_up_secs": 30,
//!       "datapool": { "kind": "recyclable", "rows": [{"user": "a"}] } }
//!   ]
//! }
//! ```

use super::datapool::{Datapool, IterableDatapool, RecyclableDatapool};
use super::volume::{ConstantVolume, DEFAULT_VOLUME_DURATION_SECS, RampVolume, SharedVolumeModel};
use super::{ScenarioDefinition, ScenarioError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFile {
    pub scenarios: Vec<ScenarioFileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFileEntry {
    pub volume: u32,
    pub journey: String,
    #[serde(default = "default_duration")]
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_up_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datapool: Option<DatapoolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatapoolConfig {
    pub kind: DatapoolKind,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatapoolKind {
    Iterable,
    Recyclable,
}

fn default_duration() -> f64 {
    DEFAULT_VOLUME_DURATION_SECS
}

impl ScenarioFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn into_definitions(self) -> Vec<ScenarioDefinition> {
        self.scenarios
            .into_iter()
            .map(ScenarioFileEntry::into_definition)
            .collect()
    }
}

impl ScenarioFileEntry {
    fn into_definition(self) -> ScenarioDefinition {
        let volume_model: SharedVolumeModel = match self.ramp_up_secs {
            Some(ramp_up) => Arc::new(RampVolume {
                peak: self.volume,
                ramp_up,
                duration: self.duration_secs,
            }),
            None => Arc::new(ConstantVolume::new(self.volume, self.duration_secs)),
        };

        let datapool = self.datapool.map(|pool| -> Box<dyn Datapool> {
            match pool.kind {
                DatapoolKind::Iterable => Box::new(IterableDatapool::new(pool.rows)),
                DatapoolKind::Recyclable => Box::new(RecyclableDatapool::new(pool.rows)),
            }
        });

        ScenarioDefinition {
            journey: self.journey,
            datapool,
            volume_model,
        }
    }
}
