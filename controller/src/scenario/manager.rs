use super::ScenarioDefinition;
use super::datapool::Datapool;
use super::volume::SharedVolumeModel;
use crate::protocol::{DataId, ScenarioId, ScenarioSummary, WorkItem};
use indexmap::IndexMap;
use metrics::{counter, gauge, histogram};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::time::{Duration, Instant as StdInstant};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A fractional work limit above this rounds up
const LIMIT_ROUND_UP_FRACTION: f64 = 0.4;

/// Scenario manager configuration
#[derive(Debug, Clone)]
pub struct ScenarioManagerConfig {
    /// How long a required-work evaluation stays valid
    pub period: Duration,
    /// Delay before scenarios start producing work
    pub start_delay: Duration,
    /// Upper bound on new journeys started per second across all runners
    pub spawn_rate: u64,
}

impl Default for ScenarioManagerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            start_delay: Duration::ZERO,
            spawn_rate: 1000,
        }
    }
}

struct Scenario {
    journey: String,
    datapool: Option<Box<dyn Datapool>>,
    volume_model: SharedVolumeModel,
}

/// Tracks scenarios and turns their volume models into work for runners
pub struct ScenarioManager {
    config: ScenarioManagerConfig,
    in_start: bool,
    start: Instant,
    /// End of the current period, in seconds since `start`
    current_period_end: f64,
    required: IndexMap<ScenarioId, u32>,
    scenarios: IndexMap<ScenarioId, Scenario>,
    next_id: ScenarioId,
}

impl ScenarioManager {
    pub fn new(config: ScenarioManagerConfig) -> Self {
        Self {
            in_start: !config.start_delay.is_zero(),
            config,
            start: Instant::now(),
            current_period_end: 0.0,
            required: IndexMap::new(),
            scenarios: IndexMap::new(),
            next_id: 0,
        }
    }

    /// Seconds since the scenario clock started
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Register a scenario, ids are assigned sequentially from 0
    pub fn add_scenario(
        &mut self,
        journey: String,
        datapool: Option<Box<dyn Datapool>>,
        volume_model: SharedVolumeModel,
    ) -> ScenarioId {
        let id = self.next_id;
        self.next_id += 1;

        info!(
            "Added scenario id={} journey={} datapool={} volume_model={}",
            id,
            journey,
            datapool.is_some(),
            volume_model.name()
        );

        self.scenarios.insert(
            id,
            Scenario {
                journey,
                datapool,
                volume_model,
            },
        );
        gauge!("mite_scenarios_active").set(self.scenarios.len() as f64);
        id
    }

    /// Register every scenario a scenario function yielded
    pub fn add_definitions(&mut self, definitions: impl IntoIterator<Item = ScenarioDefinition>) {
        for definition in definitions {
            self.add_scenario(
                definition.journey,
                definition.datapool,
                definition.volume_model,
            );
        }
    }

    /// Current required volume per scenario, re-evaluated once per period
    pub fn required_work(&mut self) -> &IndexMap<ScenarioId, u32> {
        let mut now = self.now();
        if self.in_start {
            if now <= self.config.start_delay.as_secs_f64() {
                return &self.required;
            }
            info!("Start delay elapsed, starting scenarios");
            self.in_start = false;
            self.start = Instant::now();
            now = 0.0;
        }

        if now >= self.current_period_end {
            let period = self.config.period.as_secs_f64();
            debug!(
                "Updating required work: current_period_end={} now={} period={:?}",
                self.current_period_end, now, self.config.period
            );
            // Periods nobody asked about are skipped, the window never starts
            // more than one period in the past
            let start_of_period = self.current_period_end.max(now - period);
            self.update_required_and_period(start_of_period, now + period);
        }

        &self.required
    }

    /// Re-evaluate the volume models if the current period is over
    ///
    /// Work requests do this implicitly; status readers call it so that
    /// scenarios finish and the start delay ends without any runner polling.
    pub fn refresh(&mut self) {
        self.required_work();
    }

    /// Evaluate every volume model over `[start_of_period, end_of_period)`
    ///
    /// Scenarios whose volume model has stopped are removed.
    pub fn update_required_and_period(&mut self, start_of_period: f64, end_of_period: f64) {
        let mut required = IndexMap::with_capacity(self.scenarios.len());
        let mut stopped = Vec::new();

        for (id, scenario) in &self.scenarios {
            match scenario.volume_model.volume(start_of_period, end_of_period) {
                Ok(volume) => {
                    required.insert(*id, volume);
                }
                Err(_) => stopped.push(*id),
            }
        }

        for id in stopped {
            self.remove_scenario(id, "volume_model_stopped");
        }

        self.current_period_end = end_of_period;
        gauge!("mite_required_volume").set(total_volume(&required) as f64);
        self.required = required;
    }

    fn remove_scenario(&mut self, id: ScenarioId, reason: &'static str) {
        if self.scenarios.shift_remove(&id).is_none() {
            return;
        }
        self.required.shift_remove(&id);
        info!("Removed scenario {} ({})", id, reason);
        counter!("mite_scenarios_removed_total", "reason" => reason).increment(1);
        gauge!("mite_scenarios_active").set(self.scenarios.len() as f64);

        if self.scenarios.is_empty() {
            info!("All scenarios have been removed from scenario tracker");
        }
    }

    /// Work for one runner
    ///
    /// The runner gets its share of the total required volume minus what it
    /// already runs, capped by its own limit and by the spawn rate. Returns the
    /// work items and how many were handed out per scenario.
    pub fn get_work(
        &mut self,
        current_work: &HashMap<ScenarioId, u32>,
        runner_current_total: u32,
        num_runners: usize,
        runner_self_limit: Option<u32>,
        hit_rate: f64,
    ) -> (Vec<WorkItem>, HashMap<ScenarioId, u32>) {
        let started = StdInstant::now();

        let required = self.required_work().clone();
        let diff = remove_a_from_b(current_work, &required);
        let total = total_volume(&required);

        let runners_share_limit =
            total as f64 / num_runners.max(1) as f64 - runner_current_total as f64;
        let mut limit = runners_share_limit.max(0.0);
        if let Some(runner_self_limit) = runner_self_limit {
            limit = limit.min(runner_self_limit as f64);
        }
        if hit_rate > 0.0 {
            limit = limit.min(self.config.spawn_rate as f64 / hit_rate);
        }
        let limit = round_limit(limit);

        debug!(
            "get_work: total={} num_runners={} runner_current_total={} limit={}",
            total, num_runners, runner_current_total, limit
        );

        let mut scenario_ids: Vec<ScenarioId> = diff.keys().copied().collect();
        scenario_ids.shuffle(&mut rand::rng());

        let mut work = Vec::new();
        let mut scenario_volume_map: HashMap<ScenarioId, u32> = HashMap::new();
        let mut exhausted = Vec::new();

        'scenarios: for scenario_id in scenario_ids {
            let Some(scenario) = self.scenarios.get_mut(&scenario_id) else {
                continue;
            };
            for _ in 0..diff[&scenario_id] {
                if work.len() >= limit {
                    break 'scenarios;
                }
                let data = match scenario.datapool.as_mut().map(|pool| pool.checkout()) {
                    None => None,
                    Some(Ok(Some(item))) => Some(item),
                    // Every row is in use, try again on the next request
                    Some(Ok(None)) => break,
                    Some(Err(_)) => {
                        exhausted.push(scenario_id);
                        break;
                    }
                };
                work.push(WorkItem {
                    scenario_id,
                    data_id: data.as_ref().map(|d| d.id),
                    journey: scenario.journey.clone(),
                    data: data.map(|d| d.data),
                });
                *scenario_volume_map.entry(scenario_id).or_insert(0) += 1;
            }
        }

        for scenario_id in exhausted {
            warn!("Datapool exhausted for scenario {}", scenario_id);
            self.remove_scenario(scenario_id, "datapool_exhausted");
        }

        counter!("mite_work_items_issued_total").increment(work.len() as u64);
        histogram!("mite_get_work_duration_seconds").record(started.elapsed());

        (work, scenario_volume_map)
    }

    /// Return data rows released by finished journeys to their datapools
    pub fn checkin_data(&mut self, ids: &[(ScenarioId, DataId)]) {
        for &(scenario_id, data_id) in ids {
            if let Some(pool) = self
                .scenarios
                .get_mut(&scenario_id)
                .and_then(|s| s.datapool.as_mut())
            {
                pool.checkin(data_id);
            }
        }
    }

    /// Whether the test is still running
    pub fn is_active(&self) -> bool {
        self.in_start || !self.scenarios.is_empty()
    }

    pub fn in_start(&self) -> bool {
        self.in_start
    }

    pub fn scenario_count(&self) -> usize {
        self.scenarios.len()
    }

    /// Summaries of the remaining scenarios, in id order
    pub fn summaries(&self) -> Vec<ScenarioSummary> {
        self.scenarios
            .iter()
            .map(|(id, scenario)| ScenarioSummary {
                id: *id,
                journey: scenario.journey.clone(),
                volume_model: scenario.volume_model.name(),
                required: self.required.get(id).copied().unwrap_or(0),
                has_datapool: scenario.datapool.is_some(),
            })
            .collect()
    }
}

/// `b - a` per scenario, keeping only positive differences
pub fn remove_a_from_b(
    a: &HashMap<ScenarioId, u32>,
    b: &IndexMap<ScenarioId, u32>,
) -> IndexMap<ScenarioId, u32> {
    b.iter()
        .filter_map(|(k, b_v)| {
            let a_v = a.get(k).copied().unwrap_or(0);
            (*b_v > a_v).then(|| (*k, b_v - a_v))
        })
        .collect()
}

/// Sum of required volumes, wide enough for any number of `u32` volumes
fn total_volume(required: &IndexMap<ScenarioId, u32>) -> u64 {
    required.values().map(|v| u64::from(*v)).sum()
}

fn round_limit(limit: f64) -> usize {
    if limit.fract() > LIMIT_ROUND_UP_FRACTION {
        limit.ceil() as usize
    } else {
        limit.floor() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::catalog::t;
    use crate::scenario::datapool::{IterableDatapool, RecyclableDatapool};
    use crate::scenario::volume::{StopVolumeModel, VolumeModel, volume_model_factory};
    use serde_json::json;
    use std::sync::Arc;

    /// Volume equal to the start of the window, stops after 10s
    struct ClockVolume;

    impl VolumeModel for ClockVolume {
        fn volume(&self, start: f64, _end: f64) -> Result<u32, StopVolumeModel> {
            if start > 10.0 {
                return Err(StopVolumeModel);
            }
            Ok(start as u32)
        }

        fn name(&self) -> String {
            "clock".to_string()
        }
    }

    fn builtin_manager() -> ScenarioManager {
        let mut manager = ScenarioManager::new(ScenarioManagerConfig::default());
        manager.add_definitions(t::s());
        manager
    }

    fn total(work: &HashMap<ScenarioId, u32>) -> u32 {
        work.values().sum()
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_ids_are_sequential() {
        let mut manager = ScenarioManager::new(ScenarioManagerConfig::default());
        let ids: Vec<ScenarioId> = (0..3)
            .map(|n| manager.add_scenario("t:j".into(), None, volume_model_factory(n, 60.0)))
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(manager.scenario_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_required_work_matches_builtin_table() {
        let mut manager = builtin_manager();
        let required = manager.required_work().clone();
        assert_eq!(
            required.into_iter().collect::<Vec<_>>(),
            vec![(0, 10), (1, 20), (2, 30)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_delay_holds_back_work() {
        let mut manager = ScenarioManager::new(ScenarioManagerConfig {
            start_delay: Duration::from_secs(5),
            ..Default::default()
        });
        manager.add_definitions(t::s());

        assert!(manager.in_start());
        assert!(manager.required_work().is_empty());
        let (work, _) = manager.get_work(&HashMap::new(), 0, 1, None, 0.0);
        assert!(work.is_empty());
        assert!(manager.is_active());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(manager.required_work().len(), 3);
        assert!(!manager.in_start());
    }

    #[tokio::test(start_paused = true)]
    async fn test_required_work_is_reevaluated_once_per_period() {
        let mut manager = ScenarioManager::new(ScenarioManagerConfig {
            period: Duration::from_secs(2),
            ..Default::default()
        });
        manager.add_scenario("t:j".into(), None, Arc::new(ClockVolume));

        assert_eq!(manager.required_work()[&0], 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(manager.required_work()[&0], 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        // Next window starts where the previous one ended
        assert_eq!(manager.required_work()[&0], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_volume_model_removes_scenario() {
        let mut manager = ScenarioManager::new(ScenarioManagerConfig::default());
        manager.add_scenario("t:j".into(), None, Arc::new(ClockVolume));
        manager.add_scenario("t:j".into(), None, volume_model_factory(5, 3600.0));

        manager.update_required_and_period(11.0, 12.0);

        assert_eq!(manager.required_work().keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(manager.scenario_count(), 1);
        assert!(manager.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_inactive_once_all_scenarios_stop() {
        let mut manager = builtin_manager();
        manager.required_work();
        tokio::time::advance(Duration::from_secs(3600)).await;
        // Window [3599, 3601) still starts inside the hour
        assert_eq!(manager.required_work().len(), 3);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(manager.required_work().is_empty());
        assert_eq!(manager.scenario_count(), 0);
        assert!(!manager.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_finishes_scenarios_without_requests() {
        let mut manager = ScenarioManager::new(ScenarioManagerConfig::default());
        manager.add_scenario("t:j".into(), None, volume_model_factory(3, 1.0));
        assert!(manager.is_active());

        tokio::time::advance(Duration::from_secs(3600)).await;
        manager.refresh();
        assert_eq!(manager.scenario_count(), 0);
        assert!(!manager.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_ends_start_delay() {
        let mut manager = ScenarioManager::new(ScenarioManagerConfig {
            start_delay: Duration::from_secs(2),
            ..Default::default()
        });
        manager.add_scenario("t:j".into(), None, volume_model_factory(3, 60.0));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(manager.in_start());
        manager.refresh();
        assert!(!manager.in_start());
        assert!(manager.is_active());
        assert_eq!(manager.summaries()[0].required, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_volumes_do_not_overflow() {
        let mut manager = ScenarioManager::new(ScenarioManagerConfig::default());
        manager.add_scenario("t:j".into(), None, volume_model_factory(3_000_000_000, 60.0));
        manager.add_scenario("t:j".into(), None, volume_model_factory(3_000_000_000, 60.0));

        let (work, volume_map) = manager.get_work(&HashMap::new(), 0, 1, Some(5), 0.0);
        assert_eq!(work.len(), 5);
        assert_eq!(total(&volume_map), 5);
        assert_eq!(total_volume(manager.required_work()), 6_000_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_runner_gets_full_volume() {
        let mut manager = builtin_manager();
        let (work, volume_map) = manager.get_work(&HashMap::new(), 0, 1, None, 0.0);

        assert_eq!(work.len(), 60);
        assert_eq!(volume_map, HashMap::from([(0, 10), (1, 20), (2, 30)]));
        assert!(work.iter().all(|w| w.journey == "t:j" && w.data_id.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_work_is_subtracted() {
        let mut manager = builtin_manager();
        let current = HashMap::from([(0, 10), (1, 15)]);
        let (work, volume_map) = manager.get_work(&current, 25, 1, None, 0.0);

        // Runner already holds 25 of 60, so it gets the remaining 35
        assert_eq!(work.len(), 35);
        assert_eq!(volume_map.get(&0), None);
        assert_eq!(volume_map.get(&1), Some(&5));
        assert_eq!(volume_map.get(&2), Some(&30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_share_is_split_across_runners() {
        let mut manager = builtin_manager();
        let (work, volume_map) = manager.get_work(&HashMap::new(), 0, 4, None, 0.0);
        assert_eq!(work.len(), 15);
        assert_eq!(total(&volume_map), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_self_limit_and_spawn_rate() {
        let mut manager = builtin_manager();
        let (work, _) = manager.get_work(&HashMap::new(), 0, 1, Some(7), 0.0);
        assert_eq!(work.len(), 7);

        let mut manager = ScenarioManager::new(ScenarioManagerConfig {
            spawn_rate: 10,
            ..Default::default()
        });
        manager.add_definitions(t::s());
        let (work, _) = manager.get_work(&HashMap::new(), 0, 1, None, 2.0);
        assert_eq!(work.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_limit_rounding() {
        let mut manager = ScenarioManager::new(ScenarioManagerConfig::default());
        manager.add_scenario("t:j".into(), None, volume_model_factory(5, 60.0));

        // 5 / 2 = 2.5 rounds up
        let (work, _) = manager.get_work(&HashMap::new(), 0, 2, None, 0.0);
        assert_eq!(work.len(), 3);

        // 5 / 4 = 1.25 rounds down
        let (work, _) = manager.get_work(&HashMap::new(), 0, 4, None, 0.0);
        assert_eq!(work.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_over_share_gets_nothing() {
        let mut manager = builtin_manager();
        let (work, volume_map) = manager.get_work(&HashMap::new(), 40, 2, None, 0.0);
        assert!(work.is_empty());
        assert!(volume_map.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_datapool_rows_are_attached_to_work() {
        let mut manager = ScenarioManager::new(ScenarioManagerConfig::default());
        manager.add_scenario(
            "t:j".into(),
            Some(Box::new(RecyclableDatapool::new(vec![json!("a"), json!("b")]))),
            volume_model_factory(2, 60.0),
        );

        let (work, _) = manager.get_work(&HashMap::new(), 0, 1, None, 0.0);
        assert_eq!(work.len(), 2);
        assert_eq!(work[0].data_id, Some(1));
        assert_eq!(work[1].data, Some(json!("b")));

        // Both rows out, nothing left to hand out until one comes back
        manager.checkin_data(&[(0, 2)]);
        let current = HashMap::from([(0, 1)]);
        let (work, _) = manager.get_work(&current, 1, 1, None, 0.0);
        assert_eq!(work.len(), 1);
        assert_eq!(work[0].data_id, Some(2));
        assert_eq!(manager.scenario_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_datapool_removes_scenario() {
        let mut manager = ScenarioManager::new(ScenarioManagerConfig::default());
        manager.add_scenario(
            "t:j".into(),
            Some(Box::new(IterableDatapool::new(vec![json!(1)]))),
            volume_model_factory(3, 60.0),
        );

        let (work, volume_map) = manager.get_work(&HashMap::new(), 0, 1, None, 0.0);
        assert_eq!(work.len(), 1);
        assert_eq!(volume_map, HashMap::from([(0, 1)]));
        assert_eq!(manager.scenario_count(), 0);
        assert!(!manager.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_summaries_report_required_volume() {
        let mut manager = builtin_manager();
        manager.required_work();
        let summaries = manager.summaries();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[2].required, 30);
        assert_eq!(summaries[2].volume_model, "volume model 30");
    }

    #[test]
    fn test_remove_a_from_b() {
        let a = HashMap::from([(0, 3), (1, 5), (9, 1)]);
        let b = IndexMap::from([(0, 10), (1, 5), (2, 4)]);
        let diff = remove_a_from_b(&a, &b);
        assert_eq!(diff.into_iter().collect::<Vec<_>>(), vec![(0, 7), (2, 4)]);
    }

    #[test]
    fn test_round_limit() {
        assert_eq!(round_limit(0.0), 0);
        assert_eq!(round_limit(2.4), 2);
        assert_eq!(round_limit(2.41), 3);
        assert_eq!(round_limit(6.0), 6);
    }
}
