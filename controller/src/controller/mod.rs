//! Controller: distributes scenario work to runners
//!
//! This module provides:
//! - `Controller` handling runner messages
//! - `WorkTracker` for per-runner and total work
//! - `RunnerTracker` for runner liveness and request rate
//! - `ConfigManager` for versioned runner config

pub mod config_manager;
pub mod runner_tracker;
pub mod service;
pub mod work_tracker;

pub use config_manager::ConfigManager;
pub use runner_tracker::RunnerTracker;
pub use service::{Controller, ControllerStatus, DEFAULT_RUNNER_TIMEOUT};
pub use work_tracker::WorkTracker;
