pub mod api;
pub mod auth;
pub mod config;
pub mod controller;
pub mod csms;
pub mod domain;
pub mod error;
pub mod manager;
pub mod ocpp;
pub mod policy;
pub mod profile;
pub mod station;
pub mod telemetry;

use anyhow::Result;
use axum::Router;
use config::Config;
use tracing::{info, warn};

/// Boot the whole simulator: load config, stand up the Station Manager,
/// and serve both the control API and the CSMS WebSocket endpoint until
/// shutdown is requested. Split out of `main` so integration tests can
/// drive the real app in-process against an ephemeral port.
pub async fn run() -> Result<()> {
    let cfg = Config::load()?;
    let app_state = controller::AppState::new(cfg.clone()).await?;

    #[allow(unused_mut)]
    let mut app: Router = api::router(app_state.clone(), &cfg);

    #[cfg(feature = "metrics")]
    {
        app = api::with_metrics(app);
    }

    let csms_app = csms::router(app_state.csms.clone());

    let control_addr = cfg.server.socket_addr()?;
    let csms_addr = cfg.csms.socket_addr()?;

    let control_listener = tokio::net::TcpListener::bind(control_addr).await?;
    let csms_listener = tokio::net::TcpListener::bind(csms_addr).await?;

    info!(%control_addr, "control API listening");
    info!(%csms_addr, "CSMS WebSocket listening");

    controller::spawn_controller_tasks(app_state.clone(), cfg.clone());

    let control_server =
        axum::serve(control_listener, app).with_graceful_shutdown(telemetry::shutdown_signal());
    let csms_server =
        axum::serve(csms_listener, csms_app).with_graceful_shutdown(telemetry::shutdown_signal());

    let (control_result, csms_result) = tokio::join!(control_server, csms_server);
    control_result?;
    csms_result?;

    app_state.manager.shutdown().await;
    warn!("shutdown complete");
    Ok(())
}
