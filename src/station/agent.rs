#![allow(dead_code)]
//! Station agent (C3): the per-station OCPP client lifecycle loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::station::{ConnectorStatus, OcppControlMode, StationId, StationProfile, StationSnapshot, TransportState};
use crate::error::OcppError;
use crate::ocpp::messages::*;
use crate::policy::{self, Environment, PolicyProfile, StationState};
use crate::profile::{ChargingProfileManager, ClearFilter, ClearProfileStatus, SetProfileStatus};

use super::logbuf::LogBuffer;
use super::transport::{Backoff, InboundCall, Transport};

/// Mutable runtime fields, read by `snapshot()` and the meter loop.
struct RuntimeState {
    transport: TransportState,
    connector_status: ConnectorStatus,
    ocpp_control_mode: OcppControlMode,
    transaction_id: Option<i64>,
    session_energy_wh: f64,
    session_start: Option<chrono::DateTime<Utc>>,
}

impl RuntimeState {
    fn new() -> Self {
        Self {
            transport: TransportState::Closed,
            connector_status: ConnectorStatus::Available,
            ocpp_control_mode: OcppControlMode::Policy,
            transaction_id: None,
            session_energy_wh: 0.0,
            session_start: None,
        }
    }
}

/// A single simulated charge point. Constructed by the Station Manager (C5);
/// `run()` is spawned as its lifecycle task.
pub struct StationAgent {
    id: StationId,
    profile: StationProfile,
    csms_base: String,
    logs: LogBuffer,
    profile_mgr: ChargingProfileManager,
    state: RwLock<RuntimeState>,
    running: AtomicBool,
    current_price_bits: AtomicU64,
    cancel: RwLock<CancellationToken>,
    connector_id: i32,
}

const CONNECTOR_ID: i32 = 1;

impl StationAgent {
    pub fn new(id: StationId, profile: StationProfile, csms_base: String) -> Arc<Self> {
        let nominal_voltage = profile.voltage_v;
        let phases = profile.phases;
        Arc::new(Self {
            id,
            current_price_bits: AtomicU64::new(profile.charge_if_price_below.to_bits()),
            profile,
            csms_base,
            logs: LogBuffer::new(),
            profile_mgr: ChargingProfileManager::new(nominal_voltage, phases),
            state: RwLock::new(RuntimeState::new()),
            running: AtomicBool::new(false),
            cancel: RwLock::new(CancellationToken::new()),
            connector_id: CONNECTOR_ID,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Idempotent. Spawns the lifecycle task if not already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        // CancellationToken is single-shot; a fresh one backs each run.
        *self.cancel.write() = CancellationToken::new();
        self.logs.push("agent started");
        let agent = self.clone();
        tokio::spawn(async move {
            agent.run().await;
        });
    }

    /// Idempotent. Cancels the lifecycle task; returns once the socket has
    /// closed or 5 s elapse.
    pub async fn stop(self: &Arc<Self>) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.logs.push("stop requested");
        self.cancel.read().cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.wait_closed()).await;
    }

    async fn wait_closed(&self) {
        loop {
            if self.state.read().transport == TransportState::Closed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel.read().clone()
    }

    pub fn apply_price(&self, new_price: f64) {
        self.current_price_bits.store(new_price.to_bits(), Ordering::Relaxed);
    }

    fn current_price(&self) -> f64 {
        f64::from_bits(self.current_price_bits.load(Ordering::Relaxed))
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.snapshot()
    }

    pub fn snapshot(&self) -> StationSnapshot {
        let state = self.state.read();
        let energy_kwh = state.session_energy_wh / 1000.0;
        StationSnapshot {
            id: self.id.clone(),
            profile_name: self.profile.name.clone(),
            running: self.running.load(Ordering::Relaxed),
            transport: state.transport,
            connector_status: state.connector_status,
            ocpp_control_mode: state.ocpp_control_mode,
            transaction_id: state.transaction_id,
            usage_kw: 0.0,
            energy_kwh,
            energy_percent: (energy_kwh / self.profile.max_energy_kwh * 100.0).min(100.0),
            max_energy_kwh: self.profile.max_energy_kwh,
            price_threshold: self.profile.charge_if_price_below,
            allow_peak: self.profile.allow_peak_hours,
        }
    }

    /// CSMS-originated SetChargingProfile delegate, invoked by the CSMS side
    /// through the session it holds for this station's transport.
    pub fn apply_charging_profile(&self, profile: ChargingProfile) -> SetProfileStatus {
        let now = Utc::now();
        let session_start = self.state.read().session_start;
        self.profile_mgr.set_profile(self.connector_id, profile, now, session_start)
    }

    pub fn clear_charging_profiles(&self, filter: ClearFilter) -> ClearProfileStatus {
        self.profile_mgr.clear_profiles(&filter)
    }

    pub fn composite_schedule(&self, duration_secs: i64) -> Vec<crate::profile::SchedulePoint> {
        let now = Utc::now();
        let tx = self.state.read().transaction_id;
        self.profile_mgr.get_composite_schedule(self.connector_id, tx, duration_secs, now)
    }

    async fn run(self: Arc<Self>) {
        let mut backoff = Backoff::new();

        while self.running.load(Ordering::Relaxed) {
            self.state.write().transport = TransportState::Connecting;
            let (inbound_tx, inbound_rx) = mpsc::channel(32);

            match Transport::connect(&self.csms_base, &self.id, inbound_tx).await {
                Ok(transport) => {
                    backoff.reset();
                    self.state.write().transport = TransportState::Open;
                    self.logs.push("connected to CSMS");

                    let inbound_agent = self.clone();
                    let inbound_transport = transport.clone();
                    let inbound_handle = tokio::spawn(async move {
                        inbound_agent.inbound_loop(inbound_rx, inbound_transport).await;
                    });

                    self.session_cycle(&transport).await;

                    inbound_handle.abort();
                    transport.close().await;
                    self.state.write().transport = TransportState::Closed;
                }
                Err(e) => {
                    warn!(station = %self.id, error = %e, "connection attempt failed");
                    self.state.write().transport = TransportState::Closed;
                }
            }

            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            let delay = backoff.next_delay();
            let cancel = self.cancel_token();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
            }
        }

        self.state.write().transport = TransportState::Closed;
    }

    /// Boot, then repeat the session loop until cancelled.
    async fn session_cycle(self: &Arc<Self>, transport: &Arc<Transport>) {
        if !self.boot(transport).await {
            return;
        }

        self.send_status(transport, ConnectorStatus::Available).await;
        let heartbeat_agent = self.clone();
        let heartbeat_transport = transport.clone();
        let heartbeat_handle = tokio::spawn(async move {
            heartbeat_agent.heartbeat_loop(heartbeat_transport).await;
        });

        loop {
            let cancel = self.cancel_token();
            let reconnect = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.run_one_session(transport) => r,
            };
            if reconnect || self.cancel_token().is_cancelled() {
                break;
            }
        }

        heartbeat_handle.abort();
        self.finish_in_flight_transaction(transport).await;
    }

    async fn boot(&self, transport: &Arc<Transport>) -> bool {
        loop {
            self.logs.push("boot notification sent");
            let request = BootNotificationRequest {
                charge_point_vendor: "ocpp-swarm-sim".to_string(),
                charge_point_model: self.profile.name.clone(),
                charge_point_serial_number: Some(self.id.clone()),
                charge_box_serial_number: None,
                firmware_version: Some(env!("CARGO_PKG_VERSION").to_string()),
                iccid: None,
                imsi: None,
                meter_type: None,
                meter_serial_number: None,
            };

            match transport.call("BootNotification", json!(request)).await {
                Ok(payload) => {
                    let response: BootNotificationResponse = match serde_json::from_value(payload) {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(station = %self.id, error = %e, "malformed BootNotification response");
                            return false;
                        }
                    };
                    match response.status {
                        RegistrationStatus::Accepted => {
                            self.logs.push("boot accepted");
                            return true;
                        }
                        RegistrationStatus::Pending => {
                            self.logs.push("boot pending, retrying");
                        }
                        RegistrationStatus::Rejected => {
                            self.logs.push("boot rejected, retrying");
                        }
                    }
                }
                Err(e) => {
                    warn!(station = %self.id, error = %e, "BootNotification call failed");
                    return false;
                }
            }

            let cancel = self.cancel_token();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                _ = cancel.cancelled() => return false,
            }
        }
    }

    async fn heartbeat_loop(&self, transport: Arc<Transport>) {
        let interval = Duration::from_secs(self.profile.heartbeat_interval_secs.max(1));
        loop {
            let cancel = self.cancel_token();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return,
            }
            if transport.call("Heartbeat", json!(HeartbeatRequest {})).await.is_ok() {
                self.logs.push("heartbeat");
            }
        }
    }

    async fn inbound_loop(self: Arc<Self>, mut inbound_rx: mpsc::Receiver<InboundCall>, transport: Arc<Transport>) {
        while let Some(call) = inbound_rx.recv().await {
            let payload = self.handle_inbound(&call).await;
            if let Err(e) = transport.reply(&call.message_id, payload).await {
                warn!(station = %self.id, error = %e, "failed to reply to inbound call");
            }
        }
    }

    /// Route an inbound CALL to its handler (spec §4.3.3).
    async fn handle_inbound(&self, call: &InboundCall) -> serde_json::Value {
        match call.action.as_str() {
            "SetChargingProfile" => {
                let request: Result<SetChargingProfileRequest, _> = serde_json::from_value(call.payload.clone());
                match request {
                    Ok(req) => {
                        let status = self.apply_charging_profile(req.cs_charging_profiles);
                        let status = match status {
                            SetProfileStatus::Accepted => {
                                self.state.write().ocpp_control_mode = OcppControlMode::OcppLimited;
                                self.logs.push("charging profile accepted");
                                ChargingProfileStatus::Accepted
                            }
                            SetProfileStatus::Rejected => {
                                self.logs.push("charging profile rejected");
                                ChargingProfileStatus::Rejected
                            }
                        };
                        json!(SetChargingProfileResponse { status })
                    }
                    Err(_) => json!(SetChargingProfileResponse { status: ChargingProfileStatus::Rejected }),
                }
            }
            "GetCompositeSchedule" => {
                let request: Result<GetCompositeScheduleRequest, _> = serde_json::from_value(call.payload.clone());
                match request {
                    Ok(req) => {
                        let points = self.composite_schedule(req.duration);
                        if points.is_empty() {
                            json!(GetCompositeScheduleResponse {
                                status: GetCompositeScheduleStatus::Rejected,
                                connector_id: None,
                                schedule_start: None,
                                charging_schedule: None,
                            })
                        } else {
                            let periods = points
                                .iter()
                                .map(|p| ChargingSchedulePeriod {
                                    start_period: p.start_offset_sec,
                                    limit: p.limit_w,
                                    number_phases: None,
                                })
                                .collect();
                            json!(GetCompositeScheduleResponse {
                                status: GetCompositeScheduleStatus::Accepted,
                                connector_id: Some(req.connector_id),
                                schedule_start: Some(Utc::now()),
                                charging_schedule: Some(ChargingSchedule {
                                    charging_rate_unit: ChargingRateUnit::W,
                                    charging_schedule_period: periods,
                                    duration: Some(req.duration),
                                    start_schedule: Some(Utc::now()),
                                    min_charging_rate: None,
                                }),
                            })
                        }
                    }
                    Err(_) => json!(GetCompositeScheduleResponse {
                        status: GetCompositeScheduleStatus::Rejected,
                        connector_id: None,
                        schedule_start: None,
                        charging_schedule: None,
                    }),
                }
            }
            "ClearChargingProfile" => {
                let request: ClearChargingProfileRequest =
                    serde_json::from_value(call.payload.clone()).unwrap_or_default();
                let filter = ClearFilter {
                    profile_id: request.id,
                    connector_id: request.connector_id,
                    purpose: request.charging_profile_purpose,
                    stack_level: request.stack_level,
                };
                let status = match self.clear_charging_profiles(filter) {
                    ClearProfileStatus::Accepted => {
                        self.logs.push("charging profiles cleared");
                        ClearChargingProfileStatus::Accepted
                    }
                    ClearProfileStatus::Unknown => ClearChargingProfileStatus::Unknown,
                };
                if self.profile_mgr.get_current_limit(self.connector_id, None, Utc::now()).is_none() {
                    self.state.write().ocpp_control_mode = OcppControlMode::Policy;
                }
                json!(ClearChargingProfileResponse { status })
            }
            "RemoteStartTransaction" => {
                json!(RemoteStartTransactionResponse { status: RemoteStartStopStatus::Rejected })
            }
            "RemoteStopTransaction" => {
                json!(RemoteStopTransactionResponse { status: RemoteStartStopStatus::Rejected })
            }
            "Reset" => {
                self.logs.push("reset accepted (simulated)");
                json!(ResetResponse { status: ResetStatus::Accepted })
            }
            "ChangeAvailability" => {
                self.logs.push("change availability accepted (simulated)");
                json!(ChangeAvailabilityResponse { status: AvailabilityStatus::Accepted })
            }
            "TriggerMessage" => {
                self.logs.push("trigger message accepted (simulated)");
                json!(TriggerMessageResponse { status: TriggerMessageStatus::Accepted })
            }
            other => {
                warn!(station = %self.id, action = other, "unhandled inbound action");
                json!({})
            }
        }
    }

    async fn send_status(&self, transport: &Arc<Transport>, status: ConnectorStatus) {
        self.state.write().connector_status = status;
        let request = StatusNotificationRequest {
            connector_id: self.connector_id,
            error_code: ChargePointErrorCode::NoError,
            status,
            info: None,
            timestamp: Some(Utc::now()),
            vendor_id: None,
            vendor_error_code: None,
        };
        let _ = transport.call("StatusNotification", json!(request)).await;
    }

    /// One full session attempt: authorize, transact, meter, stop. Returns
    /// `true` when a simulated outage closed the transport and the caller
    /// must reconnect before attempting another session.
    async fn run_one_session(self: &Arc<Self>, transport: &Arc<Transport>) -> bool {
        let id_tag = self.pick_id_tag();
        let env = self.environment();
        let policy_profile = self.policy_profile();

        let decision = policy::evaluate(
            StationState { energy_dispensed_kwh: 0.0, charging: false, session_active: false },
            &policy_profile,
            env,
        );
        if decision.action != policy::Action::Charge {
            self.logs.push(decision.reason);
            let cancel = self.cancel_token();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                _ = cancel.cancelled() => {}
            }
            return false;
        }

        let auth_request = AuthorizeRequest { id_tag: id_tag.clone() };
        let authorized = match transport.call("Authorize", json!(auth_request)).await {
            Ok(payload) => serde_json::from_value::<AuthorizeResponse>(payload)
                .map(|r| r.id_tag_info.status == AuthorizationStatus::Accepted)
                .unwrap_or(false),
            Err(_) => false,
        };

        if !authorized {
            self.logs.push(format!("authorization rejected for {id_tag}"));
            self.idle_sleep().await;
            return false;
        }

        self.send_status(transport, ConnectorStatus::Preparing).await;

        let start_request = StartTransactionRequest {
            connector_id: self.connector_id,
            id_tag: id_tag.clone(),
            meter_start: 0,
            reservation_id: None,
            timestamp: Utc::now(),
        };
        let transaction_id = match transport.call("StartTransaction", json!(start_request)).await {
            Ok(payload) => serde_json::from_value::<StartTransactionResponse>(payload)
                .ok()
                .map(|r| r.transaction_id),
            Err(_) => None,
        };
        let Some(transaction_id) = transaction_id else {
            self.logs.push("StartTransaction failed");
            self.idle_sleep().await;
            return false;
        };

        {
            let mut state = self.state.write();
            state.transaction_id = Some(transaction_id);
            state.session_energy_wh = 0.0;
            state.session_start = Some(Utc::now());
        }
        self.logs.push(format!("Charging started (tx {transaction_id}, tag {id_tag})"));
        self.send_status(transport, ConnectorStatus::Charging).await;

        let stop_reason = self.meter_loop(transport, transaction_id).await;

        let meter_stop = self.state.read().session_energy_wh.round() as i64;
        let stop_request = StopTransactionRequest {
            transaction_id,
            id_tag: Some(id_tag),
            meter_stop,
            timestamp: Utc::now(),
            reason: Some(stop_reason),
            transaction_data: Vec::new(),
        };
        let _ = transport.call("StopTransaction", json!(stop_request)).await;
        self.logs.push(format!(
            "Charging stopped ({:.2} kWh delivered)",
            meter_stop as f64 / 1000.0
        ));

        {
            let mut state = self.state.write();
            state.transaction_id = None;
            state.session_start = None;
        }
        self.send_status(transport, ConnectorStatus::Finishing).await;
        self.send_status(transport, ConnectorStatus::Available).await;

        self.idle_sleep().await;
        self.maybe_go_offline(transport).await
    }

    /// Per-tick metering (spec §4.3.4 step f). Returns the stop reason for
    /// the eventual StopTransaction.
    async fn meter_loop(self: &Arc<Self>, transport: &Arc<Transport>, transaction_id: i64) -> StopReason {
        let interval = Duration::from_secs(self.profile.meter_sample_interval_secs.max(1));

        loop {
            let cancel = self.cancel_token();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return StopReason::HardReset,
            }

            let now = Utc::now();
            let base_step_wh = {
                let mut rng = rand::thread_rng();
                rng.gen_range(self.profile.energy_step_wh.clone())
            };

            let cap_w = self.profile_mgr.get_current_limit(self.connector_id, Some(transaction_id), now);
            let step_wh = if let Some(cap_w) = cap_w {
                let capped = cap_w * self.profile.meter_sample_interval_secs as f64 / 3600.0;
                let step = base_step_wh.min(capped);
                self.logs.push(format!("OCPP limit: {cap_w}W -> {step:.1}Wh"));
                Some(step)
            } else {
                let env = self.environment();
                let policy_profile = self.policy_profile();
                let state = StationState {
                    energy_dispensed_kwh: self.state.read().session_energy_wh / 1000.0,
                    charging: true,
                    session_active: true,
                };
                let decision = policy::evaluate_meter_tick(state, &policy_profile, env, base_step_wh);
                if decision.is_none() {
                    self.logs.push("policy halted session");
                }
                decision
            };

            let Some(step_wh) = step_wh else {
                return StopReason::Local;
            };

            let max_wh = self.profile.max_energy_kwh * 1000.0;
            let new_energy = {
                let mut state = self.state.write();
                state.session_energy_wh = (state.session_energy_wh + step_wh).min(max_wh);
                state.session_energy_wh
            };

            let power_w = step_wh / self.profile.meter_sample_interval_secs as f64 * 3600.0;
            let meter_request = MeterValuesRequest {
                connector_id: self.connector_id,
                transaction_id: Some(transaction_id),
                meter_value: vec![MeterValue {
                    timestamp: now,
                    sampled_value: vec![
                        SampledValue::energy_active_import_register_wh(new_energy),
                        SampledValue::power_active_import_w(power_w),
                    ],
                }],
            };
            if transport.call("MeterValues", json!(meter_request)).await.is_err() {
                warn!(station = %self.id, "MeterValues call failed, continuing session");
            }

            if new_energy >= max_wh {
                return StopReason::Local;
            }
        }
    }

    async fn finish_in_flight_transaction(&self, transport: &Arc<Transport>) {
        let transaction_id = self.state.read().transaction_id;
        let Some(transaction_id) = transaction_id else { return };

        let meter_stop = self.state.read().session_energy_wh.round() as i64;
        let stop_request = StopTransactionRequest {
            transaction_id,
            id_tag: None,
            meter_stop,
            timestamp: Utc::now(),
            reason: Some(StopReason::HardReset),
            transaction_data: Vec::new(),
        };
        let _ = transport.call("StopTransaction", json!(stop_request)).await;
        self.send_status(transport, ConnectorStatus::Available).await;
        self.state.write().transaction_id = None;
        self.logs.push("in-flight transaction closed on cancellation");
    }

    async fn idle_sleep(&self) {
        let secs = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.profile.idle_between_sessions_secs.clone())
        };
        let cancel = self.cancel_token();
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = cancel.cancelled() => {}
        }
    }

    /// Simulate a connectivity outage: close the socket, sleep for the
    /// rolled duration, then report back so the caller re-dials through the
    /// normal reconnect path (spec §4.3.4.i). Returns `false` (no outage)
    /// most of the time.
    async fn maybe_go_offline(&self, transport: &Arc<Transport>) -> bool {
        let roll: f64 = rand::thread_rng().gen();
        if roll >= self.profile.offline_probability {
            return false;
        }
        let secs = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.profile.offline_duration_secs.clone())
        };
        self.logs.push(format!("simulated outage for {secs}s"));
        self.state.write().transport = TransportState::Closing;
        transport.close().await;
        self.state.write().transport = TransportState::Closed;

        let cancel = self.cancel_token();
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = cancel.cancelled() => {}
        }
        true
    }

    fn pick_id_tag(&self) -> String {
        let idx = rand::thread_rng().gen_range(0..self.profile.id_tags.len().max(1));
        self.profile.id_tags.get(idx).cloned().unwrap_or_else(|| "SIM-TAG-001".to_string())
    }

    fn environment(&self) -> Environment {
        Environment { current_price: self.current_price(), hour: Utc::now().hour() as u8 }
    }

    fn policy_profile(&self) -> PolicyProfile {
        PolicyProfile::from(&self.profile)
    }
}
