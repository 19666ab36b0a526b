//! End-to-end scenarios (spec §8): a real CSMS WebSocket server, a real
//! Station Agent dialing into it, and no mocked transport in between.

use std::collections::HashSet;
use std::time::Duration;

use ocpp_swarm_sim::csms::{CsmsBackend, CsmsConfig, CsmsState, Registry};
use ocpp_swarm_sim::domain::station::{ConnectorStatus, StationProfile};
use ocpp_swarm_sim::station::StationAgent;

/// A profile tuned for fast, deterministic ticks instead of the defaults'
/// multi-second/multi-minute intervals.
fn fast_profile(name: &str) -> StationProfile {
    let mut profile = StationProfile::default_named(name);
    profile.meter_sample_interval_secs = 1;
    profile.energy_step_wh = 100.0..100.5;
    profile.idle_between_sessions_secs = 2..3;
    profile.heartbeat_interval_secs = 3600;
    profile.offline_probability = 0.0;
    profile.allow_peak_hours = true;
    profile.peak_hours = HashSet::new();
    profile
}

/// Stand up the CSMS WebSocket endpoint on an ephemeral port and return the
/// dial-able base URL plus the registry backing it.
async fn spawn_csms() -> (String, std::sync::Arc<Registry>) {
    let registry = Registry::new(vec!["BLOCKED-TAG".to_string()]);
    let state = CsmsState { registry: registry.clone(), config: CsmsConfig::default() };
    let app = ocpp_swarm_sim::csms::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}/ocpp"), registry)
}

async fn poll_until<F: Fn() -> bool>(timeout: Duration, pred: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if pred() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn happy_session_boots_authorizes_and_meters_to_completion() {
    let (csms_base, _registry) = spawn_csms().await;

    let mut profile = fast_profile("happy");
    profile.max_energy_kwh = 0.3; // 300 Wh, ~3 meter ticks at ~100 Wh/s
    let agent = StationAgent::new("PY-SIM-0001".to_string(), profile, csms_base);
    agent.start();

    let opened = poll_until(Duration::from_secs(5), || agent.snapshot().transaction_id.is_some()).await;
    assert!(opened, "transaction never started: {:?}", agent.logs());

    let completed = poll_until(Duration::from_secs(10), || {
        let snap = agent.snapshot();
        snap.transaction_id.is_none() && snap.energy_kwh > 0.0
    })
    .await;
    assert!(completed, "session never concluded: {:?}", agent.logs());

    let snap = agent.snapshot();
    assert_eq!(snap.connector_status, ConnectorStatus::Available);
    assert!(snap.energy_kwh >= 0.29, "expected the session to reach its cap, got {}", snap.energy_kwh);

    agent.stop().await;
}

#[tokio::test]
async fn blocked_id_tag_is_never_authorized() {
    let (csms_base, _registry) = spawn_csms().await;

    let mut profile = fast_profile("blocked");
    profile.id_tags = vec!["BLOCKED-TAG".to_string()];
    profile.idle_between_sessions_secs = 1..2;
    let agent = StationAgent::new("PY-SIM-0002".to_string(), profile, csms_base);
    agent.start();

    tokio::time::sleep(Duration::from_secs(2)).await;
    let snap = agent.snapshot();
    assert!(snap.transaction_id.is_none());
    assert!(agent.logs().iter().any(|l| l.contains("authorization rejected")));

    agent.stop().await;
}

#[tokio::test]
async fn ocpp_peak_shaving_overrides_the_policy_engine_mid_session() {
    let (csms_base, registry) = spawn_csms().await;
    let csms = CsmsBackend::new(registry);

    let mut profile = fast_profile("peak-shave");
    profile.max_energy_kwh = 10.0; // long enough to stay open through the assertions
    let agent = StationAgent::new("PY-SIM-0003".to_string(), profile, csms_base);
    agent.start();

    let opened = poll_until(Duration::from_secs(5), || agent.snapshot().transaction_id.is_some()).await;
    assert!(opened, "transaction never started: {:?}", agent.logs());

    let reply = csms
        .send_peak_shaving("PY-SIM-0003", 1, 50.0)
        .await
        .expect("SetChargingProfile should reach a connected station");
    assert_eq!(reply.status, ocpp_swarm_sim::ocpp::messages::ChargingProfileStatus::Accepted);

    let switched = poll_until(Duration::from_secs(5), || {
        agent.snapshot().ocpp_control_mode == ocpp_swarm_sim::domain::station::OcppControlMode::OcppLimited
    })
    .await;
    assert!(switched, "agent never switched to OCPP-limited mode: {:?}", agent.logs());

    // every meter tick from here on sees the installed cap, so the window
    // between these two reads is entirely capped.
    let before = agent.snapshot().energy_kwh;
    tokio::time::sleep(Duration::from_millis(2200)).await;
    let after = agent.snapshot().energy_kwh;

    // unrestricted ticks add ~0.1 kWh/s; a 50 W cap should add a small
    // fraction of a Wh over the same window.
    let capped_delta_kwh = after - before;
    assert!(
        capped_delta_kwh < 0.02,
        "expected the 50W cap to sharply slow energy growth, got delta {capped_delta_kwh} kWh"
    );

    agent.stop().await;
}
