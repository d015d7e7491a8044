//! Controller and runner configuration
//!
//! Configuration is loaded from environment variables, command line flags
//! override it (see `cli`).

use crate::controller::DEFAULT_RUNNER_TIMEOUT;
use crate::protocol::Encoding;
use crate::scenario::ScenarioManagerConfig;
use std::env;
use std::time::Duration;
use tracing::warn;

/// Main configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Controller bind address
    pub host: String,
    /// Controller port
    pub port: u16,
    /// Scenario to run, `module:function` or a `.json` file
    pub scenario_spec: String,
    /// Verbose per-message logging
    pub debug: bool,

    /// Scenario scheduling configuration
    pub scenario: ScenarioConfig,

    /// Runner configuration
    pub runner: RunnerConfig,
}

/// Scenario scheduling configuration
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Delay before the scenarios start
    pub delay_start: Duration,
    /// How often volume models are re-evaluated
    pub max_loop_delay: Duration,
    /// New journeys per second across all runners
    pub spawn_rate: u64,
    /// Runners silent for longer than this no longer get a share of the work
    pub runner_timeout: Duration,
}

/// Runner-side configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// WebSocket URL of the controller
    pub controller_url: String,
    /// Pause between work requests
    pub loop_wait: Duration,
    /// Cap on work accepted per request
    pub max_work: Option<u32>,
    /// Frame encoding used to talk to the controller
    pub encoding: Encoding,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 14301,
            scenario_spec: "t:s".to_string(),
            debug: false,
            scenario: ScenarioConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            delay_start: Duration::ZERO,
            max_loop_delay: Duration::from_secs(1),
            spawn_rate: 1000,
            runner_timeout: DEFAULT_RUNNER_TIMEOUT,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            controller_url: "ws://127.0.0.1:14301/ws".to_string(),
            loop_wait: Duration::from_secs(1),
            max_work: None,
            encoding: Encoding::Json,
        }
    }
}

impl ScenarioConfig {
    pub fn manager_config(&self) -> ScenarioManagerConfig {
        ScenarioManagerConfig {
            period: self.max_loop_delay,
            start_delay: self.delay_start,
            spawn_rate: self.spawn_rate,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Controller config
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }
        if let Ok(spec) = env::var("SCENARIO_SPEC")
            && !spec.is_empty()
        {
            config.scenario_spec = spec;
        }
        if let Ok(val) = env::var("DEBUG") {
            config.debug = val.to_lowercase() == "true" || val == "1";
        }

        // Scenario config
        if let Ok(val) = env::var("DELAY_START_SECONDS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.scenario.delay_start = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("MAX_LOOP_DELAY")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.scenario.max_loop_delay = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("SPAWN_RATE")
            && let Ok(rate) = val.parse()
        {
            config.scenario.spawn_rate = rate;
        }
        if let Ok(val) = env::var("RUNNER_TIMEOUT_SECS") {
            match parse_runner_timeout(&val) {
                Some(timeout) => config.scenario.runner_timeout = timeout,
                None => warn!(
                    "Ignoring RUNNER_TIMEOUT_SECS={:?}, expected a whole number of seconds above zero",
                    val
                ),
            }
        }

        // Runner config
        if let Ok(url) = env::var("CONTROLLER_URL")
            && !url.is_empty()
        {
            config.runner.controller_url = url;
        }
        if let Ok(val) = env::var("RUNNER_LOOP_WAIT_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.runner.loop_wait = Duration::from_millis(ms);
        }
        if let Ok(val) = env::var("RUNNER_MAX_WORK")
            && let Ok(max) = val.parse()
        {
            config.runner.max_work = Some(max);
        }
        if let Ok(val) = env::var("RUNNER_MSGPACK")
            && (val.to_lowercase() == "true" || val == "1")
        {
            config.runner.encoding = Encoding::MessagePack;
        }

        config
    }
}

/// Runner timeout in whole seconds, zero is rejected
fn parse_runner_timeout(val: &str) -> Option<Duration> {
    match val.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => None,
    }
}
