//! Scenario modules compiled into the controller
//!
//! A scenario spec `module:function` names a module registered here and a
//! function inside it that yields the module's scenarios.

use super::datapool::Datapool;
use super::volume::volume_model_factory;
use super::{ScenarioDefinition, ScenarioError};
use std::collections::HashMap;

/// Function yielding a module's scenarios; call it again to restart
pub type ScenarioFn = fn() -> Box<dyn Iterator<Item = ScenarioDefinition>>;

/// Builds a fresh datapool for a scenario table row
pub type DatapoolFactory = fn() -> Box<dyn Datapool>;

/// Registry of scenario modules
#[derive(Clone, Default)]
pub struct ScenarioCatalog {
    modules: HashMap<String, HashMap<String, ScenarioFn>>,
}

impl ScenarioCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the scenario modules compiled into this binary
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("t", "s", t::s);
        catalog
    }

    pub fn register(&mut self, module: &str, function: &str, scenario: ScenarioFn) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(function.to_string(), scenario);
    }

    /// Look up `module:function`
    pub fn resolve(&self, spec: &str) -> Result<ScenarioFn, ScenarioError> {
        let (module, function) = spec
            .split_once(':')
            .filter(|(m, f)| !m.is_empty() && !f.is_empty())
            .ok_or_else(|| ScenarioError::InvalidSpec(spec.to_string()))?;

        let functions = self
            .modules
            .get(module)
            .ok_or_else(|| ScenarioError::ModuleNotFound(module.to_string()))?;

        functions
            .get(function)
            .copied()
            .ok_or_else(|| ScenarioError::FunctionNotFound {
                module: module.to_string(),
                function: function.to_string(),
            })
    }
}

/// The `t` scenario module: three constant peaks of the `t:j` journey
pub mod t {
    use super::*;

    /// Peak scenarios run at full volume for 1 hour
    pub const PEAK_DURATION_SECS: f64 = 60.0 * 60.0;

    /// `(volume, journey, datapool)` rows
    pub static SCENARIOS: [(u32, &str, Option<DatapoolFactory>); 3] =
        [(10, "t:j", None), (20, "t:j", None), (30, "t:j", None)];

    pub fn s() -> Box<dyn Iterator<Item = ScenarioDefinition>> {
        Box::new(
            SCENARIOS
                .iter()
                .map(|&(peak, journey, datapool)| ScenarioDefinition {
                    journey: journey.to_string(),
                    datapool: datapool.map(|build| build()),
                    volume_model: volume_model_factory(peak, PEAK_DURATION_SECS),
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s_yields_one_item_per_table_row() {
        assert_eq!(t::s().count(), t::SCENARIOS.len());
    }

    #[test]
    fn test_s_is_restartable() {
        let first: Vec<String> = t::s().map(|d| d.volume_model.name()).collect();
        let second: Vec<String> = t::s().map(|d| d.volume_model.name()).collect();
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec!["volume model 10", "volume model 20", "volume model 30"]
        );
    }

    #[test]
    fn test_s_volume_models_last_one_hour() {
        for definition in t::s() {
            assert!(definition.datapool.is_none());
            assert!(definition.volume_model.volume(3600.0, 3601.0).is_ok());
            assert!(definition.volume_model.volume(3601.0, 3602.0).is_err());
        }
    }

    #[test]
    fn test_resolve_errors() {
        let catalog = ScenarioCatalog::builtin();
        assert!(catalog.resolve("t:s").is_ok());
        assert!(matches!(
            catalog.resolve("x:s"),
            Err(ScenarioError::ModuleNotFound(m)) if m == "x"
        ));
        assert!(matches!(
            catalog.resolve("t:z"),
            Err(ScenarioError::FunctionNotFound { .. })
        ));
        assert!(matches!(
            catalog.resolve("t:"),
            Err(ScenarioError::InvalidSpec(_))
        ));
    }
}
