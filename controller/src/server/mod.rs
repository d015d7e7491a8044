//! HTTP and WebSocket surface of the controller

pub mod websocket;

pub use websocket::{Connection, ConnectionRegistry, WsConfig, ws_handler};

use crate::controller::{Controller, ControllerStatus};
use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub connections: ConnectionRegistry,
    pub started_at: Instant,
    pub debug: bool,
}

impl AppState {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self {
            controller,
            connections: Arc::new(RwLock::new(HashMap::new())),
            started_at: Instant::now(),
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Open WebSocket connections and the runners among them
    pub async fn get_stats(&self) -> (usize, usize) {
        let connections = self.connections.read().await;
        let runners = connections.values().filter(|c| c.runner_id.is_some()).count();
        (connections.len(), runners)
    }

    fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub test_name: String,
    pub scenario_active: bool,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsResponse {
    /// Controller uptime in seconds
    pub uptime_seconds: u64,
    /// Controller version
    pub version: String,
    /// Open WebSocket connections
    pub connections: usize,
    /// Connections that registered as runners
    pub runner_connections: usize,
    /// Runners seen within the runner timeout
    pub active_runners: usize,
    /// Scenarios still producing work
    pub scenarios_remaining: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let scenario_active = state.controller.is_active().await;
    Json(HealthResponse {
        status: if scenario_active { "running" } else { "finished" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        test_name: state.controller.test_name().to_string(),
        scenario_active,
        uptime_seconds: state.uptime_seconds(),
    })
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let (connections, runner_connections) = state.get_stats().await;
    let status = state.controller.status().await;

    Json(MetricsResponse {
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections,
        runner_connections,
        active_runners: status.active_runners.len(),
        scenarios_remaining: status.scenarios.len(),
    })
}

async fn status(State(state): State<AppState>) -> Json<ControllerStatus> {
    Json(state.controller.status().await)
}

/// Router with the controller's routes, shared by the binary and tests
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/status", get(status))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
