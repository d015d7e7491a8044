use crate::protocol::{DataId, RunnerId, ScenarioId, WorkItem};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Work per scenario, as reported by runners or assumed after handing it out
///
/// Also remembers which datapool rows each runner holds, so they can be
/// returned when the runner leaves without finishing them.
#[derive(Debug, Default)]
pub struct WorkTracker {
    all_work: HashMap<RunnerId, HashMap<ScenarioId, u32>>,
    total_work: HashMap<ScenarioId, u32>,
    checked_out: HashMap<RunnerId, HashSet<(ScenarioId, DataId)>>,
}

impl WorkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a runner's work with what it reported
    pub fn set_actual(&mut self, runner_id: RunnerId, work: HashMap<ScenarioId, u32>) {
        if let Some(previous) = self.all_work.get(&runner_id) {
            for (scenario_id, volume) in previous {
                if let Some(total) = self.total_work.get_mut(scenario_id) {
                    *total = total.saturating_sub(*volume);
                }
            }
        }

        for (scenario_id, volume) in &work {
            let total = self.total_work.entry(*scenario_id).or_insert(0);
            *total = total.saturating_add(*volume);
        }

        debug!("Runner {} reports work {:?}", runner_id, work);
        self.all_work.insert(runner_id, work);
    }

    /// Count work just handed to a runner before it reports it back
    pub fn add_assumed(&mut self, runner_id: RunnerId, work: &HashMap<ScenarioId, u32>) {
        let current = self.all_work.entry(runner_id).or_default();
        for (scenario_id, volume) in work {
            let runner = current.entry(*scenario_id).or_insert(0);
            *runner = runner.saturating_add(*volume);
            let total = self.total_work.entry(*scenario_id).or_insert(0);
            *total = total.saturating_add(*volume);
        }
    }

    /// Remember the datapool rows handed to a runner
    pub fn check_out(&mut self, runner_id: RunnerId, work: &[WorkItem]) {
        let rows = self.checked_out.entry(runner_id).or_default();
        rows.extend(
            work.iter()
                .filter_map(|item| Some((item.scenario_id, item.data_id?))),
        );
    }

    /// Rows a runner finished with, keeping only those it actually held
    ///
    /// Rows already released because the runner timed out are dropped so
    /// they are not returned to their datapool twice.
    pub fn complete(
        &mut self,
        runner_id: RunnerId,
        completed: &[(ScenarioId, DataId)],
    ) -> Vec<(ScenarioId, DataId)> {
        let Some(rows) = self.checked_out.get_mut(&runner_id) else {
            return Vec::new();
        };
        completed
            .iter()
            .copied()
            .filter(|row| rows.remove(row))
            .collect()
    }

    /// Runners with tracked work or rows
    pub fn runners(&self) -> Vec<RunnerId> {
        let mut runners: Vec<RunnerId> = self
            .all_work
            .keys()
            .chain(self.checked_out.keys())
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        runners.sort_unstable();
        runners
    }

    /// Total journeys a runner is running
    pub fn runner_total(&self, runner_id: RunnerId) -> u32 {
        self.all_work
            .get(&runner_id)
            .map(|work| work.values().fold(0u32, |sum, v| sum.saturating_add(*v)))
            .unwrap_or(0)
    }

    /// Journeys running per scenario across all runners
    pub fn total_work(&self) -> &HashMap<ScenarioId, u32> {
        &self.total_work
    }

    /// Forget a runner and its work, returning the rows it still held
    pub fn remove_runner(&mut self, runner_id: RunnerId) -> Vec<(ScenarioId, DataId)> {
        if let Some(work) = self.all_work.remove(&runner_id) {
            for (scenario_id, volume) in work {
                if let Some(total) = self.total_work.get_mut(&scenario_id) {
                    *total = total.saturating_sub(volume);
                }
            }
        }
        let mut rows: Vec<_> = self
            .checked_out
            .remove(&runner_id)
            .map(|rows| rows.into_iter().collect())
            .unwrap_or_default();
        rows.sort_unstable();
        rows
    }
}
