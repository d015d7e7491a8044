//! Command-line interface (CLI)
//!
//! Flags override the environment based configuration from `config`.
use crate::config::Config;
use crate::protocol::Encoding;
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "mite-controller",
    version,
    about = "Distributed load-test controller and runner"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve work to runners according to a scenario
    Controller(ControllerArgs),
    /// Connect to a controller and execute journeys
    Runner(RunnerArgs),
}

#[derive(Args, Debug, Default)]
pub struct ControllerArgs {
    /// Scenario to run: `module:function` or a path to a `.json` scenario file
    pub scenario_spec: Option<String>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Seconds to wait before the scenarios start
    #[arg(long)]
    pub delay_start_seconds: Option<u64>,

    /// Seconds between volume model evaluations
    #[arg(long)]
    pub max_loop_delay: Option<u64>,

    /// New journeys per second across all runners
    #[arg(long)]
    pub spawn_rate: Option<u64>,

    /// Log every runner message
    #[arg(long)]
    pub debug: bool,
}

#[derive(Args, Debug, Default)]
pub struct RunnerArgs {
    /// WebSocket URL of the controller
    #[arg(long)]
    pub controller_url: Option<String>,

    /// Cap on new work per request
    #[arg(long)]
    pub max_work: Option<u32>,

    /// Milliseconds between work requests
    #[arg(long)]
    pub loop_wait_ms: Option<u64>,

    /// Talk MessagePack instead of JSON
    #[arg(long)]
    pub msgpack: bool,
}

impl ControllerArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(spec) = &self.scenario_spec {
            config.scenario_spec = spec.clone();
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.delay_start_seconds {
            config.scenario.delay_start = Duration::from_secs(secs);
        }
        if let Some(secs) = self.max_loop_delay {
            config.scenario.max_loop_delay = Duration::from_secs(secs);
        }
        if let Some(rate) = self.spawn_rate {
            config.scenario.spawn_rate = rate;
        }
        config.debug |= self.debug;
    }
}

impl RunnerArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.controller_url {
            config.runner.controller_url = url.clone();
        }
        if let Some(max) = self.max_work {
            config.runner.max_work = Some(max);
        }
        if let Some(ms) = self.loop_wait_ms {
            config.runner.loop_wait = Duration::from_millis(ms);
        }
        if self.msgpack {
            config.runner.encoding = Encoding::MessagePack;
        }
    }
}

impl Cli {
    /// Fold the command line flags into the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        match &self.command {
            Command::Controller(args) => args.apply(config),
            Command::Runner(args) => args.apply(config),
        }
    }
}
