//! Mite Controller Library
//!
//! This module exports the controller, runner and scenario components for
//! use by the binary, integration tests and benchmarks.

pub mod cli;
pub mod config;
pub mod controller;
pub mod journey;
pub mod protocol;
pub mod runner;
pub mod scenario;
pub mod server;

// Re-export commonly used types
pub use controller::{ConfigManager, Controller, ControllerStatus};
pub use journey::{Journey, JourneyContext, JourneyError, JourneyRegistry};
pub use protocol::{ControllerMessage, Encoding, RunnerMessage, WorkItem};
pub use runner::{Runner, RunnerError, RunnerReport};
pub use scenario::{ScenarioCatalog, ScenarioManager, load_scenarios};
pub use server::{AppState, app_router};
