#![allow(dead_code)]
//! Charging-policy engine (C1).
//!
//! A pure decision function arbitrating price, peak-hour, and energy-cap
//! constraints. Takes no locks, spawns nothing, and has no side effects —
//! every call site that needs a decision can call it directly without
//! coordinating with any other component.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::StationProfile;

/// Snapshot of the fields of station runtime state the policy engine needs.
#[derive(Debug, Clone, Copy)]
pub struct StationState {
    pub energy_dispensed_kwh: f64,
    pub charging: bool,
    pub session_active: bool,
}

/// The subset of a station profile's smart-charging parameters the policy
/// engine reads. Constructed from `StationProfile` at each call site.
#[derive(Debug, Clone)]
pub struct PolicyProfile {
    pub charge_if_price_below: f64,
    pub max_energy_kwh: f64,
    pub allow_peak_hours: bool,
    pub peak_hours: HashSet<u8>,
}

impl From<&StationProfile> for PolicyProfile {
    fn from(p: &StationProfile) -> Self {
        Self {
            charge_if_price_below: p.charge_if_price_below,
            max_energy_kwh: p.max_energy_kwh,
            allow_peak_hours: p.allow_peak_hours,
            peak_hours: p.peak_hours.clone(),
        }
    }
}

/// Ambient conditions the policy evaluates against.
#[derive(Debug, Clone, Copy)]
pub struct Environment {
    pub current_price: f64,
    pub hour: u8,
}

#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Charge,
    Wait,
    Pause,
}

#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
}

impl Decision {
    fn charge() -> Self {
        Self { action: Action::Charge, reason: "within all constraints".to_string() }
    }
}

/// Evaluate whether a station may charge right now (spec §4.1).
///
/// Rule order matters: energy cap beats price, price beats peak hour. The
/// price comparison is strict greater-than (equality permits charging); the
/// energy-cap comparison is `>=` (reaching the cap exactly pauses).
pub fn evaluate(state: StationState, profile: &PolicyProfile, env: Environment) -> Decision {
    if state.energy_dispensed_kwh >= profile.max_energy_kwh {
        return Decision {
            action: Action::Pause,
            reason: format!(
                "Energy cap reached ({:.2}/{:.2} kWh)",
                state.energy_dispensed_kwh, profile.max_energy_kwh
            ),
        };
    }

    if env.current_price > profile.charge_if_price_below {
        return Decision {
            action: Action::Wait,
            reason: format!(
                "Price too high ({:.2} > {:.2})",
                env.current_price, profile.charge_if_price_below
            ),
        };
    }

    if profile.peak_hours.contains(&env.hour) && !profile.allow_peak_hours {
        return Decision {
            action: Action::Wait,
            reason: format!("Peak hour block (hour {})", env.hour),
        };
    }

    Decision::charge()
}

/// Per-tick energy step for the meter loop's legacy (non-OCPP-capped) path.
///
/// Called only when `ChargingProfileManager::get_current_limit` returned
/// `None` for the connector — an active charging profile always takes
/// absolute precedence over this function's soft reduction.
///
/// Returns `None` when the decision is `wait`/`pause` (meter loop should
/// break its session); `Some(step_wh)` otherwise, halved with a 10 Wh floor
/// during an allowed peak hour.
pub fn evaluate_meter_tick(
    state: StationState,
    profile: &PolicyProfile,
    env: Environment,
    base_step_wh: f64,
) -> Option<f64> {
    let decision = evaluate(state, profile, env);
    if decision.action != Action::Charge {
        return None;
    }

    let step = if profile.peak_hours.contains(&env.hour) && profile.allow_peak_hours {
        (base_step_wh / 2.0).max(10.0)
    } else {
        base_step_wh
    };

    Some(step)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> PolicyProfile {
        PolicyProfile {
            charge_if_price_below: 20.0,
            max_energy_kwh: 30.0,
            allow_peak_hours: false,
            peak_hours: [18u8, 19, 20].into_iter().collect(),
        }
    }

    fn state(energy_kwh: f64) -> StationState {
        StationState { energy_dispensed_kwh: energy_kwh, charging: false, session_active: true }
    }

    #[test]
    fn energy_cap_reached_exactly_pauses() {
        let d = evaluate(state(30.0), &profile(), Environment { current_price: 10.0, hour: 10 });
        assert_eq!(d.action, Action::Pause);
    }

    #[test]
    fn energy_just_below_cap_charges() {
        let d = evaluate(state(29.999), &profile(), Environment { current_price: 10.0, hour: 10 });
        assert_eq!(d.action, Action::Charge);
    }

    #[test]
    fn price_equal_threshold_charges() {
        let d = evaluate(state(0.0), &profile(), Environment { current_price: 20.0, hour: 10 });
        assert_eq!(d.action, Action::Charge);
    }

    #[test]
    fn price_above_threshold_waits() {
        let d = evaluate(state(0.0), &profile(), Environment { current_price: 20.01, hour: 10 });
        assert_eq!(d.action, Action::Wait);
        assert!(d.reason.contains("Price too high"));
    }

    #[test]
    fn peak_hour_blocked_when_not_allowed() {
        let d = evaluate(state(0.0), &profile(), Environment { current_price: 10.0, hour: 18 });
        assert_eq!(d.action, Action::Wait);
        assert!(d.reason.contains("Peak hour block"));
    }

    #[test]
    fn peak_hour_allowed_charges() {
        let mut p = profile();
        p.allow_peak_hours = true;
        let d = evaluate(state(0.0), &p, Environment { current_price: 10.0, hour: 18 });
        assert_eq!(d.action, Action::Charge);
    }

    #[test]
    fn meter_tick_halves_step_during_allowed_peak_hour() {
        let mut p = profile();
        p.allow_peak_hours = true;
        let step = evaluate_meter_tick(state(0.0), &p, Environment { current_price: 10.0, hour: 18 }, 400.0);
        assert_eq!(step, Some(200.0));
    }

    #[test]
    fn meter_tick_floors_halved_step_at_ten_wh() {
        let mut p = profile();
        p.allow_peak_hours = true;
        let step = evaluate_meter_tick(state(0.0), &p, Environment { current_price: 10.0, hour: 18 }, 15.0);
        assert_eq!(step, Some(10.0));
    }

    #[test]
    fn meter_tick_returns_none_when_blocked() {
        let step = evaluate_meter_tick(state(0.0), &profile(), Environment { current_price: 25.0, hour: 10 }, 400.0);
        assert_eq!(step, None);
    }
}
