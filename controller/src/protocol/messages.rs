use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scenario identifier assigned by the controller
pub type ScenarioId = u32;

/// Runner identifier assigned by the controller on hello
pub type RunnerId = u64;

/// Datapool row identifier
pub type DataId = u64;

/// Key/value config distributed to runners
pub type ConfigMap = HashMap<String, String>;

/// Runner to Controller messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerMessage {
    /// Register a new runner
    Hello,
    /// Keepalive between work requests
    Heartbeat { runner_id: RunnerId },
    /// Report current work and ask for more
    RequestWork {
        runner_id: RunnerId,
        /// Journeys currently running, per scenario
        #[serde(with = "super::count_map")]
        current_work: HashMap<ScenarioId, u32>,
        /// Data rows released by finished journeys
        #[serde(default)]
        completed_data_ids: Vec<(ScenarioId, DataId)>,
        /// Upper bound the runner puts on new work per request
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_work: Option<u32>,
    },
    /// Runner is shutting down
    Bye { runner_id: RunnerId },
}

/// Controller to Runner messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    /// Runner registered
    HelloReply {
        runner_id: RunnerId,
        test_name: String,
        config: ConfigMap,
    },
    /// New work plus config changes; `stop` tells the runner to wind down
    Work {
        work: Vec<WorkItem>,
        config: ConfigMap,
        stop: bool,
    },
    /// Acknowledgment of a message that needs no data in return
    Ack,
    /// The message could not be handled
    Error { message: String },
}

/// A single journey execution handed to a runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub scenario_id: ScenarioId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_id: Option<DataId>,
    pub journey: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Scenario summary for status reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub id: ScenarioId,
    pub journey: String,
    pub volume_model: String,
    pub required: u32,
    pub has_datapool: bool,
}

impl RunnerMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            RunnerMessage::Hello => "hello",
            RunnerMessage::Heartbeat { .. } => "heartbeat",
            RunnerMessage::RequestWork { .. } => "request_work",
            RunnerMessage::Bye { .. } => "bye",
        }
    }
}

impl ControllerMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            ControllerMessage::HelloReply { .. } => "hello_reply",
            ControllerMessage::Work { .. } => "work",
            ControllerMessage::Ack => "ack",
            ControllerMessage::Error { .. } => "error",
        }
    }
}
