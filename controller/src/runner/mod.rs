//! Runner: executes the journeys handed out by a controller
//!
//! A runner registers with `hello`, then repeatedly reports its in-flight
//! work and receives new work items until the controller says stop. Journeys
//! run concurrently on the tokio runtime; finished ones are reported with the
//! next work request so their datapool rows can be recycled.

use crate::config::RunnerConfig;
use crate::journey::{JourneyContext, JourneyError, JourneyRegistry};
use crate::protocol::{
    ConfigMap, ControllerMessage, DataId, Encoding, ProtocolError, RunnerId, RunnerMessage,
    ScenarioId, WorkItem,
};
use crate::scenario::DataItem;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::{Id, JoinSet};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Runner errors
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Unexpected reply from controller: {0}")]
    UnexpectedReply(&'static str),

    #[error("Controller rejected request: {0}")]
    Rejected(String),

    #[error("Controller closed the connection")]
    Disconnected,
}

/// What a runner did over its lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerReport {
    pub runner_id: RunnerId,
    pub test_name: String,
    pub journeys_started: u64,
    pub journeys_succeeded: u64,
    pub journeys_failed: u64,
}

/// Request/reply channel to the controller
struct ControllerConnection {
    stream: WsStream,
    encoding: Encoding,
}

impl ControllerConnection {
    async fn connect(url: &str, encoding: Encoding) -> Result<Self, RunnerError> {
        let (stream, _) = connect_async(url).await?;
        info!("Connected to controller at {}", url);
        Ok(Self { stream, encoding })
    }

    async fn request(&mut self, msg: &RunnerMessage) -> Result<ControllerMessage, RunnerError> {
        let frame = match self.encoding {
            Encoding::Json => Message::text(serde_json::to_string(msg).map_err(ProtocolError::from)?),
            Encoding::MessagePack => Message::binary(self.encoding.encode(msg)?),
        };
        self.stream.send(frame).await?;

        while let Some(frame) = self.stream.next().await {
            let reply = match frame? {
                Message::Text(text) => Encoding::Json.decode(text.as_bytes())?,
                Message::Binary(bytes) => Encoding::MessagePack.decode(&bytes)?,
                Message::Close(_) => return Err(RunnerError::Disconnected),
                _ => continue,
            };
            return match reply {
                ControllerMessage::Error { message } => Err(RunnerError::Rejected(message)),
                reply => Ok(reply),
            };
        }
        Err(RunnerError::Disconnected)
    }

    async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error closing controller connection: {}", e);
        }
    }
}

type JourneyOutcome = Result<(), JourneyError>;

/// Journeys currently executing, keyed by task so panics can be attributed
#[derive(Default)]
struct InFlight {
    tasks: JoinSet<JourneyOutcome>,
    items: HashMap<Id, (ScenarioId, Option<DataId>)>,
    current_work: HashMap<ScenarioId, u32>,
    completed_data_ids: Vec<(ScenarioId, DataId)>,
}

impl InFlight {
    fn spawn(&mut self, item: WorkItem, ctx: JourneyContext, registry: &JourneyRegistry) -> bool {
        let journey = match registry.get(&item.journey) {
            Ok(journey) => journey,
            Err(e) => {
                warn!("Skipping work item for scenario {}: {}", item.scenario_id, e);
                if let Some(data_id) = item.data_id {
                    self.completed_data_ids.push((item.scenario_id, data_id));
                }
                return false;
            }
        };

        let handle = self.tasks.spawn(async move { journey.run(&ctx).await });
        self.items.insert(handle.id(), (item.scenario_id, item.data_id));
        *self.current_work.entry(item.scenario_id).or_default() += 1;
        true
    }

    fn finish(&mut self, id: Id, report: &mut RunnerReport, outcome: Option<JourneyOutcome>) {
        let Some((scenario_id, data_id)) = self.items.remove(&id) else {
            return;
        };
        if let Some(count) = self.current_work.get_mut(&scenario_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.current_work.remove(&scenario_id);
            }
        }
        if let Some(data_id) = data_id {
            self.completed_data_ids.push((scenario_id, data_id));
        }

        match outcome {
            Some(Ok(())) => {
                report.journeys_succeeded += 1;
                counter!("mite_journeys_total", "outcome" => "success").increment(1);
            }
            Some(Err(e)) => {
                report.journeys_failed += 1;
                counter!("mite_journeys_total", "outcome" => "failed").increment(1);
                warn!("Journey for scenario {} failed: {}", scenario_id, e);
            }
            None => {
                report.journeys_failed += 1;
                counter!("mite_journeys_total", "outcome" => "panicked").increment(1);
                error!("Journey for scenario {} panicked", scenario_id);
            }
        }
    }

    /// Collect journeys that finished since the last call
    fn reap(&mut self, report: &mut RunnerReport) {
        while let Some(result) = self.tasks.try_join_next_with_id() {
            self.record(result, report);
        }
    }

    /// Wait for every journey still running
    async fn drain(&mut self, report: &mut RunnerReport) {
        while let Some(result) = self.tasks.join_next_with_id().await {
            self.record(result, report);
        }
    }

    fn record(
        &mut self,
        result: Result<(Id, JourneyOutcome), tokio::task::JoinError>,
        report: &mut RunnerReport,
    ) {
        match result {
            Ok((id, outcome)) => self.finish(id, report, Some(outcome)),
            Err(e) => self.finish(e.id(), report, None),
        }
    }
}

/// Pulls work from a controller and runs it
pub struct Runner {
    config: RunnerConfig,
    journeys: JourneyRegistry,
}

impl Runner {
    pub fn new(config: RunnerConfig, journeys: JourneyRegistry) -> Self {
        Self { config, journeys }
    }

    /// Run until the controller reports the test is over
    pub async fn run(&self) -> Result<RunnerReport, RunnerError> {
        let mut conn =
            ControllerConnection::connect(&self.config.controller_url, self.config.encoding)
                .await?;

        let (runner_id, test_name, mut config) = match conn.request(&RunnerMessage::Hello).await? {
            ControllerMessage::HelloReply {
                runner_id,
                test_name,
                config,
            } => (runner_id, test_name, config),
            other => return Err(RunnerError::UnexpectedReply(other.message_type())),
        };
        info!("Registered as runner {} for test {}", runner_id, test_name);

        let mut report = RunnerReport {
            runner_id,
            test_name,
            ..Default::default()
        };
        let mut in_flight = InFlight::default();

        loop {
            in_flight.reap(&mut report);

            let request = RunnerMessage::RequestWork {
                runner_id,
                current_work: in_flight.current_work.clone(),
                completed_data_ids: std::mem::take(&mut in_flight.completed_data_ids),
                max_work: self.config.max_work,
            };
            let (work, changes, stop) = match conn.request(&request).await? {
                ControllerMessage::Work { work, config, stop } => (work, config, stop),
                other => return Err(RunnerError::UnexpectedReply(other.message_type())),
            };

            if !changes.is_empty() {
                debug!("Runner {} received {} config changes", runner_id, changes.len());
                config.extend(changes);
            }

            for item in work {
                let ctx = context_for(runner_id, &item, &config);
                report.journeys_started += 1;
                if !in_flight.spawn(item, ctx, &self.journeys) {
                    report.journeys_failed += 1;
                }
            }

            if stop {
                info!("Controller signalled stop, waiting for running journeys");
                break;
            }
            tokio::time::sleep(self.config.loop_wait).await;
        }

        in_flight.drain(&mut report).await;
        conn.request(&RunnerMessage::Bye { runner_id }).await?;
        conn.close().await;

        info!(
            "Runner {} finished: {} started, {} succeeded, {} failed",
            runner_id, report.journeys_started, report.journeys_succeeded, report.journeys_failed
        );
        Ok(report)
    }
}

fn context_for(runner_id: RunnerId, item: &WorkItem, config: &ConfigMap) -> JourneyContext {
    let data = match (item.data_id, &item.data) {
        (Some(id), Some(data)) => Some(DataItem {
            id,
            data: data.clone(),
        }),
        _ => None,
    };
    JourneyContext {
        runner_id,
        journey: item.journey.clone(),
        data,
        config: config.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journey::{Journey, SleepJourney};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct FailingJourney;

    #[async_trait]
    impl Journey for FailingJourney {
        async fn run(&self, _ctx: &JourneyContext) -> Result<(), JourneyError> {
            Err(JourneyError::Failed("boom".into()))
        }
    }

    fn item(scenario_id: ScenarioId, data_id: Option<DataId>, journey: &str) -> WorkItem {
        WorkItem {
            scenario_id,
            data_id,
            journey: journey.to_string(),
            data: data_id.map(|id| serde_json::json!({ "row": id })),
        }
    }

    fn registry() -> JourneyRegistry {
        let mut registry = JourneyRegistry::new();
        registry.register(
            "t:j",
            Arc::new(SleepJourney::new(Duration::from_millis(10), "hi")),
        );
        registry.register("t:fail", Arc::new(FailingJourney));
        registry
    }

    #[test]
    fn test_context_carries_data_and_config() {
        let config = ConfigMap::from([("k".into(), "v".into())]);
        let ctx = context_for(4, &item(1, Some(9), "t:j"), &config);
        assert_eq!(ctx.runner_id, 4);
        assert_eq!(ctx.data.map(|d| d.id), Some(9));
        assert_eq!(ctx.config.get("k").map(String::as_str), Some("v"));

        let ctx = context_for(4, &item(1, None, "t:j"), &config);
        assert!(ctx.data.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_tracks_work_and_returns_data_ids() {
        let registry = registry();
        let mut in_flight = InFlight::default();
        let mut report = RunnerReport::default();

        for work in [item(0, None, "t:j"), item(0, None, "t:j"), item(1, Some(5), "t:fail")] {
            let ctx = context_for(1, &work, &ConfigMap::new());
            assert!(in_flight.spawn(work, ctx, &registry));
        }
        assert_eq!(in_flight.current_work, HashMap::from([(0, 2), (1, 1)]));

        in_flight.drain(&mut report).await;
        assert!(in_flight.current_work.is_empty());
        assert_eq!(in_flight.completed_data_ids, vec![(1, 5)]);
        assert_eq!(report.journeys_succeeded, 2);
        assert_eq!(report.journeys_failed, 1);
    }

    #[tokio::test]
    async fn test_unknown_journey_is_skipped_and_data_returned() {
        let mut in_flight = InFlight::default();
        let work = item(2, Some(7), "t:missing");
        let ctx = context_for(1, &work, &ConfigMap::new());

        assert!(!in_flight.spawn(work, ctx, &registry()));
        assert!(in_flight.current_work.is_empty());
        assert_eq!(in_flight.completed_data_ids, vec![(2, 7)]);
    }
}
