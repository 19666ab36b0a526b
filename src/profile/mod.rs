#![allow(dead_code)]
//! Charging-profile manager (C2).
//!
//! Owned by each Station Agent as private, per-connector state. Stores,
//! stacks, and resolves OCPP charging profiles; computes composite
//! schedules and instantaneous power limits. A single `parking_lot::RwLock`
//! guards the profile table — mutations (`set_profile`, `clear_profiles`)
//! take a write lock, `get_current_limit`/`get_composite_schedule` take a
//! read lock, so the meter loop never blocks behind another read.

use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::RwLock;

use crate::ocpp::messages::{
    ChargingProfile, ChargingProfileKind, ChargingProfilePurpose, ChargingRateUnit, RecurrencyKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetProfileStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearProfileStatus {
    Accepted,
    Unknown,
}

/// Filter for `clear_profiles`; absent fields are wildcards. AND semantics
/// across the fields that are set.
#[derive(Debug, Clone, Default)]
pub struct ClearFilter {
    pub profile_id: Option<i32>,
    pub connector_id: Option<i32>,
    pub purpose: Option<ChargingProfilePurpose>,
    pub stack_level: Option<i32>,
}

/// A `(startOffsetSec, limit_w)` breakpoint in a composite schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulePoint {
    pub start_offset_sec: i64,
    pub limit_w: f64,
}

struct StoredProfile {
    connector_id: i32,
    profile: ChargingProfile,
    installed_at: DateTime<Utc>,
    /// Transaction start, required to evaluate `Relative` schedules.
    transaction_start: Option<DateTime<Utc>>,
}

struct ProfileTable {
    profiles: Vec<StoredProfile>,
}

pub struct ChargingProfileManager {
    inner: RwLock<ProfileTable>,
    nominal_voltage_v: f64,
    default_phases: u8,
}

impl ChargingProfileManager {
    pub fn new(nominal_voltage_v: f64, default_phases: u8) -> Self {
        Self {
            inner: RwLock::new(ProfileTable { profiles: Vec::new() }),
            nominal_voltage_v,
            default_phases,
        }
    }

    /// Validate and install a profile, replacing any existing profile at the
    /// same `(purpose, stackLevel, connectorId)`.
    pub fn set_profile(
        &self,
        connector_id: i32,
        profile: ChargingProfile,
        now: DateTime<Utc>,
        transaction_start: Option<DateTime<Utc>>,
    ) -> SetProfileStatus {
        if !Self::is_structurally_valid(&profile) {
            return SetProfileStatus::Rejected;
        }

        let mut table = self.inner.write();
        table.profiles.retain(|stored| {
            !(stored.connector_id == connector_id
                && stored.profile.charging_profile_purpose == profile.charging_profile_purpose
                && stored.profile.stack_level == profile.stack_level)
        });
        table.profiles.push(StoredProfile {
            connector_id,
            profile,
            installed_at: now,
            transaction_start,
        });
        SetProfileStatus::Accepted
    }

    fn is_structurally_valid(profile: &ChargingProfile) -> bool {
        let periods = &profile.charging_schedule.charging_schedule_period;
        if periods.is_empty() {
            return false;
        }
        if periods[0].start_period < 0 {
            return false;
        }
        if !periods.windows(2).all(|w| w[0].start_period < w[1].start_period) {
            return false;
        }
        if profile.charging_profile_purpose == ChargingProfilePurpose::TxProfile
            && profile.transaction_id.is_none()
        {
            return false;
        }
        true
    }

    /// Remove every profile matching `filter`'s set fields (AND semantics).
    pub fn clear_profiles(&self, filter: &ClearFilter) -> ClearProfileStatus {
        let mut table = self.inner.write();
        let before = table.profiles.len();
        table.profiles.retain(|stored| {
            let matches = filter.profile_id.map_or(true, |id| stored.profile.charging_profile_id == id)
                && filter.connector_id.map_or(true, |c| stored.connector_id == c)
                && filter.purpose.map_or(true, |p| stored.profile.charging_profile_purpose == p)
                && filter.stack_level.map_or(true, |s| stored.profile.stack_level == s);
            !matches
        });
        if table.profiles.len() < before {
            ClearProfileStatus::Accepted
        } else {
            ClearProfileStatus::Unknown
        }
    }

    /// Minimum active limit across all applicable profiles, in watts.
    pub fn get_current_limit(
        &self,
        connector_id: i32,
        transaction_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let table = self.inner.read();
        let winner_per_purpose = self.winners_at(&table, connector_id, transaction_id, now);
        winner_per_purpose
            .into_iter()
            .flatten()
            .fold(None, |acc, limit| Some(acc.map_or(limit, |a: f64| a.min(limit))))
    }

    /// Resolve the minimum limit contributed by each purpose's winning
    /// profile (lower `stackLevel` wins within a purpose), in priority order
    /// TxProfile, TxDefaultProfile, ChargePointMaxProfile.
    fn winners_at(
        &self,
        table: &ProfileTable,
        connector_id: i32,
        transaction_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> [Option<f64>; 3] {
        let purposes = [
            ChargingProfilePurpose::TxProfile,
            ChargingProfilePurpose::TxDefaultProfile,
            ChargingProfilePurpose::ChargePointMaxProfile,
        ];

        let mut out = [None, None, None];
        for (i, purpose) in purposes.iter().enumerate() {
            let mut best: Option<(i32, f64)> = None;
            for stored in &table.profiles {
                if stored.profile.charging_profile_purpose != *purpose {
                    continue;
                }
                if !self.applies(stored, connector_id, transaction_id, now) {
                    continue;
                }
                let Some(limit) = self.limit_at(stored, now) else { continue };
                let stack = stored.profile.stack_level;
                if best.map_or(true, |(s, _)| stack < s) {
                    best = Some((stack, limit));
                }
            }
            out[i] = best.map(|(_, limit)| limit);
        }
        out
    }

    fn applies(
        &self,
        stored: &StoredProfile,
        connector_id: i32,
        transaction_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> bool {
        let profile = &stored.profile;

        if let Some(valid_from) = profile.valid_from {
            if now < valid_from {
                return false;
            }
        }
        if let Some(valid_to) = profile.valid_to {
            if now > valid_to {
                return false;
            }
        }

        self.static_applies(stored, connector_id, transaction_id)
    }

    /// The time-independent half of `applies`: connector and
    /// purpose/transaction matching, without the `validFrom`/`validTo`
    /// window check. Used to decide whether a profile could ever
    /// contribute a breakpoint over a scanned window, separately from
    /// whether it applies at any one instant within it.
    fn static_applies(&self, stored: &StoredProfile, connector_id: i32, transaction_id: Option<i64>) -> bool {
        if stored.connector_id != 0 && stored.connector_id != connector_id {
            return false;
        }

        match stored.profile.charging_profile_purpose {
            ChargingProfilePurpose::TxProfile => stored.profile.transaction_id == transaction_id,
            ChargingProfilePurpose::TxDefaultProfile => transaction_id.is_some(),
            ChargingProfilePurpose::ChargePointMaxProfile => true,
        }
    }

    /// Offset-to-watts limit of `stored`'s schedule at `now`, or `None` if
    /// `now` precedes the schedule's first period or the schedule has expired.
    fn limit_at(&self, stored: &StoredProfile, now: DateTime<Utc>) -> Option<f64> {
        let offset = self.offset_seconds(stored, now)?;
        let periods = &stored.profile.charging_schedule.charging_schedule_period;

        if let Some(duration) = stored.profile.charging_schedule.duration {
            if offset >= duration {
                return None;
            }
        }

        let period = periods.iter().rev().find(|p| p.start_period <= offset)?;
        Some(self.to_watts(period.limit, period.number_phases, &stored.profile))
    }

    fn offset_seconds(&self, stored: &StoredProfile, now: DateTime<Utc>) -> Option<i64> {
        let schedule = &stored.profile.charging_schedule;
        match stored.profile.charging_profile_kind {
            ChargingProfileKind::Absolute => {
                let anchor = schedule.start_schedule.unwrap_or(stored.installed_at);
                Some((now - anchor).num_seconds()).filter(|s| *s >= 0)
            }
            ChargingProfileKind::Recurring => {
                let anchor = schedule.start_schedule.unwrap_or(stored.installed_at);
                if now < anchor {
                    return None;
                }
                match stored.profile.recurrency_kind {
                    Some(RecurrencyKind::Weekly) => {
                        let midnight_monday = now
                            .date_naive()
                            .week(chrono::Weekday::Mon)
                            .first_day()
                            .and_hms_opt(0, 0, 0)?
                            .and_utc();
                        Some((now - midnight_monday).num_seconds().rem_euclid(604_800))
                    }
                    _ => {
                        let midnight = now.date_naive().and_hms_opt(0, 0, 0)?.and_utc();
                        Some((now - midnight).num_seconds().rem_euclid(86_400))
                    }
                }
            }
            ChargingProfileKind::Relative => {
                let anchor = stored.transaction_start?;
                Some((now - anchor).num_seconds()).filter(|s| *s >= 0)
            }
        }
    }

    fn to_watts(&self, limit: f64, number_phases: Option<i32>, profile: &ChargingProfile) -> f64 {
        match profile.charging_schedule.charging_rate_unit {
            ChargingRateUnit::W => limit,
            ChargingRateUnit::A => {
                let phases = number_phases.unwrap_or(self.default_phases as i32) as f64;
                limit * self.nominal_voltage_v * phases
            }
        }
    }

    /// Step-function composite schedule over `[now, now+duration)`, sampled
    /// at every distinct breakpoint contributed by any applicable profile's
    /// periods or `validTo` expiry, with consecutive equal-limit segments
    /// collapsed.
    pub fn get_composite_schedule(
        &self,
        connector_id: i32,
        transaction_id: Option<i64>,
        duration_secs: i64,
        now: DateTime<Utc>,
    ) -> Vec<SchedulePoint> {
        let table = self.inner.read();

        // Breakpoints come from every profile that could ever apply to this
        // connector/transaction, not just the ones active at `now` — a
        // future `validFrom` must still contribute its periods' and its own
        // start breakpoint so the union-of-boundaries scan (spec.md:100)
        // catches the moment it turns on.
        let mut breakpoints: Vec<i64> = vec![0];
        for stored in &table.profiles {
            if !self.static_applies(stored, connector_id, transaction_id) {
                continue;
            }
            let Some(anchor_offset) = self.offset_seconds(stored, now) else { continue };
            for period in &stored.profile.charging_schedule.charging_schedule_period {
                let relative = period.start_period - anchor_offset;
                if relative > 0 && relative < duration_secs {
                    breakpoints.push(relative);
                }
            }
            if let Some(valid_from) = stored.profile.valid_from {
                let start_offset = (valid_from - now).num_seconds();
                if start_offset > 0 && start_offset < duration_secs {
                    breakpoints.push(start_offset);
                }
            }
            if let Some(valid_to) = stored.profile.valid_to {
                let expiry_offset = (valid_to - now).num_seconds();
                if expiry_offset > 0 && expiry_offset < duration_secs {
                    breakpoints.push(expiry_offset);
                }
            }
        }
        breakpoints.sort_unstable();
        breakpoints.dedup();

        let mut out = Vec::new();
        for offset in breakpoints {
            let sample_at = now + chrono::Duration::seconds(offset);
            let winners = self.winners_at(&table, connector_id, transaction_id, sample_at);
            let limit = winners.into_iter().flatten().fold(None, |acc, l| {
                Some(acc.map_or(l, |a: f64| a.min(l)))
            });
            let Some(limit) = limit else { continue };

            match out.last_mut() {
                Some(SchedulePoint { limit_w, .. }) if (*limit_w - limit).abs() < f64::EPSILON => {}
                _ => out.push(SchedulePoint { start_offset_sec: offset, limit_w: limit }),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::messages::{ChargingProfileKind, ChargingSchedule, ChargingSchedulePeriod};

    fn base_profile(
        id: i32,
        purpose: ChargingProfilePurpose,
        stack_level: i32,
        limit_w: f64,
        tx: Option<i64>,
    ) -> ChargingProfile {
        ChargingProfile {
            charging_profile_id: id,
            transaction_id: tx,
            stack_level,
            charging_profile_purpose: purpose,
            charging_profile_kind: ChargingProfileKind::Absolute,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                charging_rate_unit: ChargingRateUnit::W,
                charging_schedule_period: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: limit_w,
                    number_phases: None,
                }],
                duration: None,
                start_schedule: None,
                min_charging_rate: None,
            },
        }
    }

    #[test]
    fn set_then_clear_round_trips_to_no_limit() {
        let mgr = ChargingProfileManager::new(230.0, 3);
        let now = Utc::now();
        let profile = base_profile(1, ChargingProfilePurpose::ChargePointMaxProfile, 0, 7400.0, None);
        assert_eq!(mgr.set_profile(0, profile, now, None), SetProfileStatus::Accepted);
        assert_eq!(mgr.get_current_limit(1, None, now), Some(7400.0));

        let status = mgr.clear_profiles(&ClearFilter { profile_id: Some(1), ..Default::default() });
        assert_eq!(status, ClearProfileStatus::Accepted);
        assert_eq!(mgr.get_current_limit(1, None, now), None);
    }

    #[test]
    fn clear_unknown_profile_returns_unknown() {
        let mgr = ChargingProfileManager::new(230.0, 3);
        let status = mgr.clear_profiles(&ClearFilter { profile_id: Some(99), ..Default::default() });
        assert_eq!(status, ClearProfileStatus::Unknown);
    }

    #[test]
    fn rejects_tx_profile_without_transaction_id() {
        let mgr = ChargingProfileManager::new(230.0, 3);
        let profile = base_profile(1, ChargingProfilePurpose::TxProfile, 0, 7400.0, None);
        assert_eq!(mgr.set_profile(0, profile, Utc::now(), None), SetProfileStatus::Rejected);
    }

    #[test]
    fn stacked_precedence_tx_profile_wins_over_tx_default() {
        let mgr = ChargingProfileManager::new(230.0, 3);
        let now = Utc::now();
        let default_profile = base_profile(1, ChargingProfilePurpose::TxDefaultProfile, 0, 22000.0, None);
        let tx_profile = base_profile(2, ChargingProfilePurpose::TxProfile, 0, 7400.0, Some(55));
        mgr.set_profile(0, default_profile, now, None);
        mgr.set_profile(0, tx_profile, now, Some(now));

        assert_eq!(mgr.get_current_limit(1, Some(55), now), Some(7400.0));

        // after the transaction ends, TxProfile no longer applies
        assert_eq!(mgr.get_current_limit(1, None, now), Some(22000.0));
    }

    #[test]
    fn clear_by_purpose_leaves_other_purposes_intact() {
        let mgr = ChargingProfileManager::new(230.0, 3);
        let now = Utc::now();
        mgr.set_profile(0, base_profile(1, ChargingProfilePurpose::TxDefaultProfile, 0, 22000.0, None), now, None);
        mgr.set_profile(0, base_profile(2, ChargingProfilePurpose::TxProfile, 0, 7400.0, Some(1)), now, Some(now));

        mgr.clear_profiles(&ClearFilter { purpose: Some(ChargingProfilePurpose::TxDefaultProfile), ..Default::default() });

        assert_eq!(mgr.get_current_limit(1, Some(1), now), Some(7400.0));
        assert_eq!(mgr.get_current_limit(1, None, now), None);
    }

    #[test]
    fn amp_rate_unit_converts_using_nominal_voltage_and_phases() {
        let mgr = ChargingProfileManager::new(230.0, 3);
        let now = Utc::now();
        let mut profile = base_profile(1, ChargingProfilePurpose::ChargePointMaxProfile, 0, 0.0, None);
        profile.charging_schedule.charging_rate_unit = ChargingRateUnit::A;
        profile.charging_schedule.charging_schedule_period[0].limit = 32.0;
        mgr.set_profile(0, profile, now, None);

        assert_eq!(mgr.get_current_limit(1, None, now), Some(32.0 * 230.0 * 3.0));
    }

    #[test]
    fn composite_schedule_is_idempotent_for_unchanged_profiles() {
        let mgr = ChargingProfileManager::new(230.0, 3);
        let now = Utc::now();
        mgr.set_profile(0, base_profile(1, ChargingProfilePurpose::ChargePointMaxProfile, 0, 7400.0, None), now, None);

        let a = mgr.get_composite_schedule(1, None, 3600, now);
        let b = mgr.get_composite_schedule(1, None, 3600, now);
        assert_eq!(a, b);
        assert_eq!(a, vec![SchedulePoint { start_offset_sec: 0, limit_w: 7400.0 }]);
    }

    #[test]
    fn composite_schedule_empty_when_nothing_applies() {
        let mgr = ChargingProfileManager::new(230.0, 3);
        assert!(mgr.get_composite_schedule(1, None, 3600, Utc::now()).is_empty());
    }

    #[test]
    fn composite_schedule_includes_future_valid_from_breakpoint() {
        let mgr = ChargingProfileManager::new(230.0, 3);
        let now = Utc::now();
        mgr.set_profile(
            0,
            base_profile(1, ChargingProfilePurpose::ChargePointMaxProfile, 0, 7400.0, None),
            now,
            None,
        );

        // a TxDefaultProfile that only starts applying 600s from now — its
        // period breakpoint must still show up even though it doesn't apply
        // at `now` itself.
        let mut future = base_profile(2, ChargingProfilePurpose::TxDefaultProfile, 0, 3700.0, None);
        future.valid_from = Some(now + chrono::Duration::seconds(600));
        mgr.set_profile(0, future, now, Some(now));

        let schedule = mgr.get_composite_schedule(1, Some(1), 3600, now);
        assert_eq!(
            schedule,
            vec![
                SchedulePoint { start_offset_sec: 0, limit_w: 7400.0 },
                SchedulePoint { start_offset_sec: 600, limit_w: 3700.0 },
            ]
        );
    }
}
