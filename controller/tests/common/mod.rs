//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

use async_trait::async_trait;
use axum::Router;
use mite_controller::config::RunnerConfig;
use mite_controller::journey::SleepJourney;
use mite_controller::protocol::Encoding;
use mite_controller::scenario::{
    ScenarioCatalog, ScenarioManagerConfig, catalog::t, volume_model_factory,
};
use mite_controller::{
    AppState, ConfigManager, Controller, Journey, JourneyContext, JourneyError, JourneyRegistry,
    ScenarioManager, app_router,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scheduling fast enough for tests that run scenarios to completion
pub fn fast_manager_config() -> ScenarioManagerConfig {
    ScenarioManagerConfig {
        period: Duration::from_millis(100),
        ..Default::default()
    }
}

/// Controller running the builtin `t:s` scenarios
pub fn builtin_controller() -> Arc<Controller> {
    let mut manager = ScenarioManager::new(ScenarioManagerConfig::default());
    manager.add_definitions(ScenarioCatalog::builtin().resolve("t:s").unwrap()());
    Arc::new(Controller::new(
        "t:s",
        manager,
        ConfigManager::new(),
        Duration::from_secs(10),
    ))
}

/// Controller with one `t:j` scenario that finishes after `duration_secs`
pub fn short_controller(volume: u32, duration_secs: f64) -> Arc<Controller> {
    let mut manager = ScenarioManager::new(fast_manager_config());
    manager.add_scenario(
        "t:j".to_string(),
        None,
        volume_model_factory(volume, duration_secs),
    );
    let mut config = ConfigManager::new();
    config.set("greeting", "hello");
    Arc::new(Controller::new(
        "short",
        manager,
        config,
        Duration::from_secs(10),
    ))
}

/// Create a test application router with state
pub fn create_test_app_with_state(controller: Arc<Controller>) -> (Router, AppState) {
    let app_state = AppState::new(controller);
    (app_router(app_state.clone()), app_state)
}

/// Create a test application router running the builtin scenarios
pub fn create_test_app() -> Router {
    create_test_app_with_state(builtin_controller()).0
}

/// Start a test server on a random port
pub async fn start_test_server(state: AppState) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app_router(state);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, handle)
}

/// Journeys that finish quickly
pub fn quick_registry() -> JourneyRegistry {
    let mut registry = JourneyRegistry::new();
    registry.register(
        "t:j",
        Arc::new(SleepJourney::new(Duration::from_millis(20), "quick")),
    );
    registry
}

pub fn runner_config(addr: SocketAddr, encoding: Encoding) -> RunnerConfig {
    RunnerConfig {
        controller_url: format!("ws://{}/ws", addr),
        loop_wait: Duration::from_millis(50),
        max_work: None,
        encoding,
    }
}

/// Records the data rows and config each execution received
#[derive(Default)]
pub struct RecordingJourney {
    pub data_ids: Mutex<Vec<u64>>,
    pub configs: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl Journey for RecordingJourney {
    async fn run(&self, ctx: &JourneyContext) -> Result<(), JourneyError> {
        if let Some(data) = &ctx.data {
            self.data_ids.lock().unwrap().push(data.id);
        }
        self.configs
            .lock()
            .unwrap()
            .push(ctx.config.get("greeting").cloned());
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(())
    }
}

/// Builtin scenario table, for assertions against the status endpoint
pub fn builtin_volumes() -> Vec<u32> {
    t::SCENARIOS.iter().map(|(volume, _, _)| *volume).collect()
}
