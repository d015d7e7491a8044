use axum::{response::IntoResponse, routing::get};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use mite_controller::cli::{Cli, Command};
use mite_controller::config::Config;
use mite_controller::{
    AppState, ConfigManager, Controller, JourneyRegistry, Runner, ScenarioCatalog,
    ScenarioManager, app_router, load_scenarios,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Update gauge metrics for runners and connections (called periodically)
async fn update_gauge_metrics(state: &AppState) {
    let (connections, _) = state.get_stats().await;
    let active_runners = state.controller.active_runner_count().await;

    metrics::gauge!("mite_ws_connections_active").set(connections as f64);
    metrics::gauge!("mite_runners_active").set(active_runners as f64);
}

/// Resolves once the scenarios are done and every runner has left, or on ctrl-c
async fn shutdown_signal(controller: Arc<Controller>) {
    let finished = async {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            if !controller.is_active().await && controller.active_runner_count().await == 0 {
                info!("All scenarios finished and all runners gone");
                break;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received ctrl-c, shutting down"),
        _ = finished => {}
    }
}

async fn run_controller(config: Config) -> anyhow::Result<()> {
    // Initialize Prometheus metrics recorder (must be done before any metrics are recorded)
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    PROMETHEUS_HANDLE.set(prometheus_handle).ok();

    info!(
        "Loaded configuration: host={}, port={}, scenario={}",
        config.host, config.port, config.scenario_spec
    );

    let definitions = load_scenarios(
        &config.scenario_spec,
        &ScenarioCatalog::builtin(),
        &JourneyRegistry::builtin(),
    )?;
    info!("Loaded {} scenarios", definitions.len());

    let mut manager = ScenarioManager::new(config.scenario.manager_config());
    manager.add_definitions(definitions);

    let controller = Arc::new(Controller::new(
        config.scenario_spec.clone(),
        manager,
        ConfigManager::from_env(),
        config.scenario.runner_timeout,
    ));
    let app_state = AppState::new(controller.clone()).with_debug(config.debug);

    // Periodic update of gauge metrics (every 5 seconds)
    let metrics_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            update_gauge_metrics(&metrics_state).await;
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = app_router(app_state)
        .route("/metrics/prometheus", get(prometheus_metrics))
        .layer(ServiceBuilder::new().layer(cors));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Mite controller listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(controller))
        .await?;

    info!("Controller stopped");
    Ok(())
}

async fn run_runner(config: Config) -> anyhow::Result<()> {
    info!("Connecting runner to {}", config.runner.controller_url);
    let runner = Runner::new(config.runner, JourneyRegistry::builtin());
    let report = runner.run().await?;
    info!("{}", serde_json::to_string(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mite_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Environment first, flags on top
    let mut config = Config::from_env();
    cli.apply(&mut config);

    match cli.command {
        Command::Controller(_) => run_controller(config).await,
        Command::Runner(_) => run_runner(config).await,
    }
}
