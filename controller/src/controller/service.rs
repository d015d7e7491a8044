use super::config_manager::ConfigManager;
use super::runner_tracker::RunnerTracker;
use super::work_tracker::WorkTracker;
use crate::protocol::{
    ControllerMessage, DataId, RunnerId, RunnerMessage, ScenarioId, ScenarioSummary,
};
use crate::scenario::ScenarioManager;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default time after which a silent runner is no longer counted
pub const DEFAULT_RUNNER_TIMEOUT: Duration = Duration::from_secs(10);

struct ControllerState {
    scenario_manager: ScenarioManager,
    work_tracker: WorkTracker,
    runner_tracker: RunnerTracker,
    config_manager: ConfigManager,
    runner_count: RunnerId,
}

impl ControllerState {
    /// Drop the work and rows of runners that went silent
    ///
    /// A runner that comes back simply reports its work again.
    fn release_timed_out_runners(&mut self) {
        let active = self.runner_tracker.active();
        for runner_id in self.work_tracker.runners() {
            if active.binary_search(&runner_id).is_ok() {
                continue;
            }
            let rows = self.work_tracker.remove_runner(runner_id);
            self.scenario_manager.checkin_data(&rows);
            warn!(
                "Runner {} timed out, released its work and {} datapool rows",
                runner_id,
                rows.len()
            );
            counter!("mite_runners_timed_out_total").increment(1);
        }
    }
}

/// Point-in-time view of the test for status endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub test_name: String,
    pub active: bool,
    pub in_start: bool,
    pub runners_registered: RunnerId,
    pub active_runners: Vec<RunnerId>,
    pub hit_rate: f64,
    pub total_work: HashMap<ScenarioId, u32>,
    pub scenarios: Vec<ScenarioSummary>,
}

/// Hands out work to runners according to the scenarios' volume models
pub struct Controller {
    test_name: String,
    state: Mutex<ControllerState>,
}

impl Controller {
    pub fn new(
        test_name: impl Into<String>,
        scenario_manager: ScenarioManager,
        config_manager: ConfigManager,
        runner_timeout: Duration,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            state: Mutex::new(ControllerState {
                scenario_manager,
                work_tracker: WorkTracker::new(),
                runner_tracker: RunnerTracker::new(runner_timeout),
                config_manager,
                runner_count: 0,
            }),
        }
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Dispatch a runner message to its handler
    pub async fn handle(&self, msg: RunnerMessage) -> ControllerMessage {
        counter!("mite_runner_messages_total", "type" => msg.message_type()).increment(1);

        match msg {
            RunnerMessage::Hello => self.hello().await,
            RunnerMessage::Heartbeat { runner_id } => {
                self.heartbeat(runner_id).await;
                ControllerMessage::Ack
            }
            RunnerMessage::RequestWork {
                runner_id,
                current_work,
                completed_data_ids,
                max_work,
            } => {
                self.request_work(runner_id, current_work, completed_data_ids, max_work)
                    .await
            }
            RunnerMessage::Bye { runner_id } => {
                self.bye(runner_id).await;
                ControllerMessage::Ack
            }
        }
    }

    /// Register a runner, ids are assigned sequentially from 1
    pub async fn hello(&self) -> ControllerMessage {
        let mut state = self.state.lock().await;
        state.runner_count += 1;
        let runner_id = state.runner_count;
        state.runner_tracker.touch(runner_id);
        let config = state.config_manager.changes_for_runner(runner_id);

        info!(
            "Runner {} registered ({} total)",
            runner_id, state.runner_count
        );

        ControllerMessage::HelloReply {
            runner_id,
            test_name: self.test_name.clone(),
            config,
        }
    }

    pub async fn heartbeat(&self, runner_id: RunnerId) {
        debug!("Heartbeat from runner {}", runner_id);
        self.state.lock().await.runner_tracker.touch(runner_id);
    }

    /// Take the runner's report and hand it its share of the required work
    pub async fn request_work(
        &self,
        runner_id: RunnerId,
        current_work: HashMap<ScenarioId, u32>,
        completed_data_ids: Vec<(ScenarioId, DataId)>,
        max_work: Option<u32>,
    ) -> ControllerMessage {
        let start = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        state.work_tracker.set_actual(runner_id, current_work);
        state.runner_tracker.update(runner_id);
        let completed = state.work_tracker.complete(runner_id, &completed_data_ids);
        state.scenario_manager.checkin_data(&completed);
        state.release_timed_out_runners();

        let runner_total = state.work_tracker.runner_total(runner_id);
        let num_runners = state.runner_tracker.active().len();
        let hit_rate = state.runner_tracker.hit_rate();
        let (work, scenario_volume_map) = state.scenario_manager.get_work(
            state.work_tracker.total_work(),
            runner_total,
            num_runners,
            max_work,
            hit_rate,
        );
        state
            .work_tracker
            .add_assumed(runner_id, &scenario_volume_map);
        state.work_tracker.check_out(runner_id, &work);

        let config = state.config_manager.changes_for_runner(runner_id);
        let stop = !state.scenario_manager.is_active();

        debug!(
            "Runner {} gets {} work items (stop={})",
            runner_id,
            work.len(),
            stop
        );
        histogram!("mite_request_work_duration_seconds").record(start.elapsed());

        ControllerMessage::Work { work, config, stop }
    }

    /// Runner is leaving, forget its work
    pub async fn bye(&self, runner_id: RunnerId) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let rows = state.work_tracker.remove_runner(runner_id);
        state.scenario_manager.checkin_data(&rows);
        state.runner_tracker.remove_runner(runner_id);
        state.config_manager.remove_runner(runner_id);
        info!("Runner {} said bye", runner_id);
    }

    /// Whether scenarios are still running or about to start
    pub async fn is_active(&self) -> bool {
        let mut state = self.state.lock().await;
        state.scenario_manager.refresh();
        state.scenario_manager.is_active()
    }

    pub async fn active_runner_count(&self) -> usize {
        self.state.lock().await.runner_tracker.active().len()
    }

    pub async fn status(&self) -> ControllerStatus {
        let mut state = self.state.lock().await;
        state.scenario_manager.refresh();
        ControllerStatus {
            test_name: self.test_name.clone(),
            active: state.scenario_manager.is_active(),
            in_start: state.scenario_manager.in_start(),
            runners_registered: state.runner_count,
            active_runners: state.runner_tracker.active(),
            hit_rate: state.runner_tracker.hit_rate(),
            total_work: state.work_tracker.total_work().clone(),
            scenarios: state.scenario_manager.summaries(),
        }
    }
}
