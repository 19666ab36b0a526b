#![allow(dead_code)]
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::csms::{CsmsBackend, CsmsConfig, CsmsState, Registry};
use crate::manager::StationManager;

/// Shared application state handed to every API handler and background task.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub manager: Arc<StationManager>,
    pub csms: CsmsState,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self> {
        let registry = Registry::new(cfg.csms.id_tag_blocklist.clone());
        let csms_backend = Arc::new(CsmsBackend::new(registry.clone()));
        let csms = CsmsState {
            registry,
            config: CsmsConfig {
                heartbeat_interval_secs: cfg.csms.heartbeat_interval_secs,
                replace_existing: cfg.csms.replace_existing_sessions,
            },
        };

        // `Transport::connect` dials `<csms_base>/<station_id>` directly, so
        // the `/ocpp` route segment has to live in the base url itself.
        let csms_base = format!(
            "ws://{}:{}/ocpp",
            loopback_host(&cfg.csms.host),
            cfg.csms.port
        );

        let manager = StationManager::new(
            csms_base,
            csms_backend,
            cfg.fleet.profiles.clone(),
            cfg.fleet.default_profile.clone(),
            cfg.fleet.initial_price,
        );

        Ok(Self { cfg, manager, csms })
    }
}

/// Stations connect to the CSMS over the loopback interface; a bind host of
/// `0.0.0.0` isn't a valid address to dial, so resolve it to `127.0.0.1`.
fn loopback_host(host: &str) -> &str {
    if host == "0.0.0.0" {
        "127.0.0.1"
    } else {
        host
    }
}

/// Bring the fleet up to its configured size and start every agent. Run
/// once at startup, after the control API and CSMS listeners are bound so
/// stations have somewhere to connect to (spec §4.5).
pub fn spawn_controller_tasks(state: AppState, cfg: Config) {
    tokio::spawn(async move {
        match state
            .manager
            .scale(cfg.fleet.default_count, &cfg.fleet.default_profile)
            .await
        {
            Ok(count) => {
                info!(count, "fleet scaled to configured size");
                let started = state.manager.start_all().await;
                info!(started, "fleet startup complete");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to scale fleet to configured size");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_host_rewrites_unspecified_bind_address() {
        assert_eq!(loopback_host("0.0.0.0"), "127.0.0.1");
        assert_eq!(loopback_host("192.168.1.5"), "192.168.1.5");
    }
}
