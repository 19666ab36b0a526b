#![allow(dead_code)]
//! CSMS-originated control-plane facades (spec §4.4 point 4).
//!
//! Thin helpers that construct the canonical charging profile for a named
//! scenario and delegate to `CsmsSession::call`. Consumed by the Station
//! Manager's control-plane routing (§4.5) and the `send test profile`
//! control-plane capability (§6.2).

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::error::OcppError;
use crate::ocpp::messages::{
    ChargingProfile, ChargingProfileKind, ChargingProfilePurpose, ChargingRateUnit,
    ChargingSchedule, ChargingSchedulePeriod, ClearChargingProfileRequest,
    ClearChargingProfileResponse, GetCompositeScheduleResponse, RecurrencyKind,
    SetChargingProfileResponse,
};
use crate::ocpp::messages::{GetCompositeScheduleRequest, SetChargingProfileRequest};

use super::registry::Registry;
use super::session::CsmsSession;

pub struct CsmsBackend {
    registry: Arc<Registry>,
}

impl CsmsBackend {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    fn session(&self, station_id: &str) -> Result<Arc<CsmsSession>, OcppError> {
        self.registry
            .session(station_id)
            .ok_or_else(|| OcppError::StationDisconnected(station_id.to_string()))
    }

    async fn call(&self, station_id: &str, action: &str, payload: Value) -> Result<Value, OcppError> {
        self.session(station_id)?.call(action, payload).await
    }

    pub async fn send_charging_profile(
        &self,
        station_id: &str,
        connector_id: i32,
        profile: ChargingProfile,
    ) -> Result<SetChargingProfileResponse, OcppError> {
        let request = SetChargingProfileRequest { connector_id, cs_charging_profiles: profile };
        let payload =
            serde_json::to_value(&request).map_err(|e| OcppError::ProtocolViolation(e.to_string()))?;
        let reply = self.call(station_id, "SetChargingProfile", payload).await?;
        serde_json::from_value(reply).map_err(|e| OcppError::ProtocolViolation(e.to_string()))
    }

    pub async fn get_composite_schedule(
        &self,
        station_id: &str,
        connector_id: i32,
        duration: i64,
        unit: Option<ChargingRateUnit>,
    ) -> Result<GetCompositeScheduleResponse, OcppError> {
        let request = GetCompositeScheduleRequest { connector_id, duration, charging_rate_unit: unit };
        let payload =
            serde_json::to_value(&request).map_err(|e| OcppError::ProtocolViolation(e.to_string()))?;
        let reply = self.call(station_id, "GetCompositeSchedule", payload).await?;
        serde_json::from_value(reply).map_err(|e| OcppError::ProtocolViolation(e.to_string()))
    }

    pub async fn clear_charging_profile(
        &self,
        station_id: &str,
        filter: ClearChargingProfileRequest,
    ) -> Result<ClearChargingProfileResponse, OcppError> {
        let payload =
            serde_json::to_value(&filter).map_err(|e| OcppError::ProtocolViolation(e.to_string()))?;
        let reply = self.call(station_id, "ClearChargingProfile", payload).await?;
        serde_json::from_value(reply).map_err(|e| OcppError::ProtocolViolation(e.to_string()))
    }

    /// Construct and send a `ChargePointMaxProfile` absolute cap — the
    /// "peak shaving" scenario.
    pub async fn send_peak_shaving(
        &self,
        station_id: &str,
        connector_id: i32,
        max_w: f64,
    ) -> Result<SetChargingProfileResponse, OcppError> {
        let profile = ChargingProfile {
            charging_profile_id: next_profile_id(),
            transaction_id: None,
            stack_level: 0,
            charging_profile_purpose: ChargingProfilePurpose::ChargePointMaxProfile,
            charging_profile_kind: ChargingProfileKind::Absolute,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                charging_rate_unit: ChargingRateUnit::W,
                charging_schedule_period: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: max_w,
                    number_phases: None,
                }],
                duration: None,
                start_schedule: None,
                min_charging_rate: None,
            },
        };
        self.send_charging_profile(station_id, connector_id, profile).await
    }

    /// Construct and send a daily-recurring `TxDefaultProfile` alternating
    /// an off-peak and peak power limit — the "time of use" scenario.
    pub async fn send_time_of_use(
        &self,
        station_id: &str,
        connector_id: i32,
        off_peak_w: f64,
        peak_w: f64,
        peak_start_secs: i64,
        peak_end_secs: i64,
    ) -> Result<SetChargingProfileResponse, OcppError> {
        let profile = ChargingProfile {
            charging_profile_id: next_profile_id(),
            transaction_id: None,
            stack_level: 0,
            charging_profile_purpose: ChargingProfilePurpose::TxDefaultProfile,
            charging_profile_kind: ChargingProfileKind::Recurring,
            recurrency_kind: Some(RecurrencyKind::Daily),
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                charging_rate_unit: ChargingRateUnit::W,
                charging_schedule_period: vec![
                    ChargingSchedulePeriod { start_period: 0, limit: off_peak_w, number_phases: None },
                    ChargingSchedulePeriod {
                        start_period: peak_start_secs,
                        limit: peak_w,
                        number_phases: None,
                    },
                    ChargingSchedulePeriod {
                        start_period: peak_end_secs,
                        limit: off_peak_w,
                        number_phases: None,
                    },
                ],
                duration: None,
                start_schedule: Some(Utc::now()),
                min_charging_rate: None,
            },
        };
        self.send_charging_profile(station_id, connector_id, profile).await
    }

    /// Construct and send a `TxProfile` capping the power draw of an active
    /// transaction for a bounded duration — the "energy cap" scenario.
    /// `max_wh` is advisory: the schedule can only express a power x
    /// duration budget, so callers should pick `duration_secs`/`power_w`
    /// such that their product approximates the desired cap.
    pub async fn send_energy_cap(
        &self,
        station_id: &str,
        connector_id: i32,
        transaction_id: i64,
        max_wh: f64,
        duration_secs: i64,
        power_w: f64,
    ) -> Result<SetChargingProfileResponse, OcppError> {
        let approx_wh = power_w * duration_secs as f64 / 3600.0;
        debug!(max_wh, approx_wh, "approximating energy cap via power x duration");

        let profile = ChargingProfile {
            charging_profile_id: next_profile_id(),
            transaction_id: Some(transaction_id),
            stack_level: 0,
            charging_profile_purpose: ChargingProfilePurpose::TxProfile,
            charging_profile_kind: ChargingProfileKind::Relative,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                charging_rate_unit: ChargingRateUnit::W,
                charging_schedule_period: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: power_w,
                    number_phases: None,
                }],
                duration: Some(duration_secs),
                start_schedule: None,
                min_charging_rate: None,
            },
        };
        self.send_charging_profile(station_id, connector_id, profile).await
    }
}

fn next_profile_id() -> i32 {
    use std::sync::atomic::{AtomicI32, Ordering};
    static NEXT: AtomicI32 = AtomicI32::new(1000);
    NEXT.fetch_add(1, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn facades_fail_fast_when_station_is_disconnected() {
        let backend = CsmsBackend::new(Registry::new(vec![]));
        let err = backend
            .send_peak_shaving("PY-SIM-0001", 1, 7400.0)
            .await
            .unwrap_err();
        assert!(matches!(err, OcppError::StationDisconnected(_)));
    }

    #[test]
    fn profile_ids_are_monotonically_increasing() {
        let a = next_profile_id();
        let b = next_profile_id();
        assert!(b > a);
    }
}
