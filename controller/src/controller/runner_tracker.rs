use crate::protocol::RunnerId;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Shortest timeout accepted, a zero window would count nobody as active
pub const MIN_RUNNER_TIMEOUT: Duration = Duration::from_secs(1);

/// Liveness of runners and the rate of work requests
#[derive(Debug)]
pub struct RunnerTracker {
    hits: VecDeque<Instant>,
    last_seen: HashMap<RunnerId, Instant>,
    timeout: Duration,
}

impl RunnerTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            hits: VecDeque::new(),
            last_seen: HashMap::new(),
            timeout: timeout.max(MIN_RUNNER_TIMEOUT),
        }
    }

    /// Record a request from a runner
    pub fn update(&mut self, runner_id: RunnerId) {
        let now = Instant::now();
        self.last_seen.insert(runner_id, now);
        self.hits.push_back(now);
        self.prune(now);
    }

    /// Mark a runner as alive without counting a work request
    pub fn touch(&mut self, runner_id: RunnerId) {
        self.last_seen.insert(runner_id, Instant::now());
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.hits.front() {
            if now.saturating_duration_since(*oldest) < self.timeout {
                break;
            }
            self.hits.pop_front();
        }
    }

    /// Runners seen within the timeout, sorted by id
    pub fn active(&self) -> Vec<RunnerId> {
        let now = Instant::now();
        let mut active: Vec<RunnerId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) < self.timeout)
            .map(|(id, _)| *id)
            .collect();
        active.sort_unstable();
        active
    }

    /// Work requests per second over the timeout window
    pub fn hit_rate(&self) -> f64 {
        let now = Instant::now();
        let hits = self
            .hits
            .iter()
            .filter(|hit| now.saturating_duration_since(**hit) < self.timeout)
            .count();
        hits as f64 / self.timeout.as_secs_f64()
    }

    pub fn remove_runner(&mut self, runner_id: RunnerId) {
        self.last_seen.remove(&runner_id);
    }
}
