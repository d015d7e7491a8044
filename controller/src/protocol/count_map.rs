//! Per-scenario counts travel as `[[scenario_id, count], ...]`
//!
//! Internally tagged messages are buffered before deserialization, which turns
//! JSON object keys into strings that no longer parse as integers.

use super::ScenarioId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

pub fn serialize<S>(counts: &HashMap<ScenarioId, u32>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut pairs: Vec<(ScenarioId, u32)> = counts.iter().map(|(k, v)| (*k, *v)).collect();
    pairs.sort_unstable();
    pairs.serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<ScenarioId, u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let pairs = Vec::<(ScenarioId, u32)>::deserialize(deserializer)?;
    let mut counts = HashMap::with_capacity(pairs.len());
    for (scenario_id, count) in pairs {
        *counts.entry(scenario_id).or_insert(0) += count;
    }
    Ok(counts)
}
