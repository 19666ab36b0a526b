#![allow(dead_code)]
//! Station identity, behavior presets, and runtime snapshots.
//!
//! These are the value objects shared across the Station Agent (C3), the
//! Station Manager (C5), and the control API — independent of any
//! particular transport.

use std::collections::HashSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Stable textual station id, e.g. `PY-SIM-0001`. Unique within a fleet and
/// used as the routing key for both the control plane and the CSMS registry.
pub type StationId = String;

/// Format the Nth station id in the manager's default naming scheme.
pub fn format_station_id(n: usize) -> StationId {
    format!("PY-SIM-{:04}", n)
}

/// Behavior preset for a simulated station. Immutable for the station's
/// lifetime unless replaced wholesale by a restart.
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationProfile {
    pub name: String,
    pub heartbeat_interval_secs: u64,
    #[serde(with = "range_u64")]
    pub idle_between_sessions_secs: Range<u64>,
    pub meter_sample_interval_secs: u64,
    #[serde(with = "range_f64")]
    pub energy_step_wh: Range<f64>,
    pub offline_probability: f64,
    #[serde(with = "range_u64")]
    pub offline_duration_secs: Range<u64>,
    pub id_tags: Vec<String>,

    /// Smart-charging / policy parameters (C1 inputs).
    pub charge_if_price_below: f64,
    pub max_energy_kwh: f64,
    pub allow_peak_hours: bool,
    pub peak_hours: HashSet<u8>,

    /// Nominal voltage used to convert OCPP "A" rate-unit schedules to
    /// watts. Defaults to 230V (Open Question #1 in DESIGN.md).
    #[serde(default = "default_voltage")]
    pub voltage_v: f64,
    #[serde(default = "default_phases")]
    pub phases: u8,
}

fn default_voltage() -> f64 {
    230.0
}

fn default_phases() -> u8 {
    3
}

impl StationProfile {
    /// A reasonable default preset used when no named profile is given.
    pub fn default_named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            heartbeat_interval_secs: 300,
            idle_between_sessions_secs: 5..30,
            meter_sample_interval_secs: 10,
            energy_step_wh: 200.0..600.0,
            offline_probability: 0.01,
            offline_duration_secs: 10..60,
            id_tags: vec!["SIM-TAG-001".to_string(), "SIM-TAG-002".to_string()],
            charge_if_price_below: 30.0,
            max_energy_kwh: 30.0,
            allow_peak_hours: false,
            peak_hours: [17u8, 18, 19, 20].into_iter().collect(),
            voltage_v: default_voltage(),
            phases: default_phases(),
        }
    }
}

/// Connector / charge-point status, mirrored 1:1 from OCPP's
/// `ChargePointStatus` (see `ocpp::messages`) so the runtime snapshot never
/// needs to re-derive it by scraping logs (REDESIGN FLAG, Open Question #2).
pub use crate::ocpp::messages::ChargePointStatus as ConnectorStatus;

/// Transport-level connection state of a station's single WebSocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Whether the meter loop's power cap currently comes from an installed
/// OCPP charging profile or from the fallback policy engine. Exposed on
/// snapshots instead of requiring dashboard log-scraping.
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OcppControlMode {
    /// No applicable charging profile; the policy engine (C1) decides.
    Policy,
    /// An OCPP charging profile provides an absolute power cap (C2 precedence).
    OcppLimited,
}

/// A point-in-time view over a station agent's state, safe to serialize
/// directly to the control API.
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub id: StationId,
    pub profile_name: String,
    pub running: bool,
    pub transport: TransportState,
    pub connector_status: ConnectorStatus,
    pub ocpp_control_mode: OcppControlMode,
    pub transaction_id: Option<i64>,
    pub usage_kw: f64,
    pub energy_kwh: f64,
    pub energy_percent: f64,
    pub max_energy_kwh: f64,
    pub price_threshold: f64,
    pub allow_peak: bool,
}

/// Aggregated totals across the whole fleet.
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct FleetTotals {
    pub total_energy_kwh: f64,
    pub total_earnings: f64,
    pub station_count: usize,
    pub charging_count: usize,
}

mod range_u64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::ops::Range;

    #[derive(Serialize, Deserialize)]
    struct RangeDto {
        min: u64,
        max: u64,
    }

    pub fn serialize<S: Serializer>(r: &Range<u64>, s: S) -> Result<S::Ok, S::Error> {
        RangeDto { min: r.start, max: r.end }.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Range<u64>, D::Error> {
        let dto = RangeDto::deserialize(d)?;
        Ok(dto.min..dto.max)
    }
}

mod range_f64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::ops::Range;

    #[derive(Serialize, Deserialize)]
    struct RangeDto {
        min: f64,
        max: f64,
    }

    pub fn serialize<S: Serializer>(r: &Range<f64>, s: S) -> Result<S::Ok, S::Error> {
        RangeDto { min: r.start, max: r.end }.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Range<f64>, D::Error> {
        let dto = RangeDto::deserialize(d)?;
        Ok(dto.min..dto.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_station_ids_with_zero_padding() {
        assert_eq!(format_station_id(1), "PY-SIM-0001");
        assert_eq!(format_station_id(42), "PY-SIM-0042");
    }

    #[test]
    fn default_profile_has_sane_peak_hours() {
        let p = StationProfile::default_named("default");
        assert!(p.peak_hours.contains(&18));
        assert!(!p.peak_hours.contains(&10));
    }

    #[test]
    fn profile_round_trips_through_json() {
        let p = StationProfile::default_named("rt");
        let json = serde_json::to_string(&p).unwrap();
        let back: StationProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "rt");
        assert_eq!(back.idle_between_sessions_secs, p.idle_between_sessions_secs);
    }
}
