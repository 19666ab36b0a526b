#![allow(dead_code)]
//! Station Manager (C5): the fleet supervisor.
//!
//! Owns the registry `id -> Arc<StationAgent>` (spec §4.5), fans out price
//! updates, and routes CSMS-originated control-plane commands by station
//! id. The registry itself is the only cross-station shared state here;
//! agents do not coordinate with each other (spec §5: "no cross-agent
//! locks").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::csms::CsmsBackend;
use crate::domain::station::{format_station_id, FleetTotals, StationId, StationProfile, StationSnapshot};
use crate::error::OcppError;
use crate::ocpp::messages::{
    ChargingProfile, ChargingRateUnit, ClearChargingProfileRequest, ClearChargingProfileResponse,
    GetCompositeScheduleResponse, SetChargingProfileResponse,
};
use crate::station::StationAgent;

/// Bounded concurrency for `start_all`/`stop_all` (spec §4.5, §5).
const BATCH_CONCURRENCY: usize = 10;
const BATCH_STAGGER: Duration = Duration::from_millis(100);

/// A named CSMS-originated smart-charging scenario, as exercised by the
/// control plane's "send test profile" capability (spec §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scenario", rename_all = "camelCase")]
pub enum TestProfileScenario {
    PeakShaving {
        connector_id: i32,
        max_w: f64,
    },
    TimeOfUse {
        connector_id: i32,
        off_peak_w: f64,
        peak_w: f64,
        peak_start_secs: i64,
        peak_end_secs: i64,
    },
    EnergyCap {
        connector_id: i32,
        transaction_id: i64,
        max_wh: f64,
        duration_secs: i64,
        power_w: f64,
    },
}

pub struct StationManager {
    registry: RwLock<HashMap<StationId, Arc<StationAgent>>>,
    csms_base: String,
    csms: Arc<CsmsBackend>,
    profiles: HashMap<String, StationProfile>,
    default_profile: String,
    current_price_bits: AtomicU64,
}

impl StationManager {
    pub fn new(
        csms_base: String,
        csms: Arc<CsmsBackend>,
        profiles: HashMap<String, StationProfile>,
        default_profile: String,
        initial_price: f64,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(HashMap::new()),
            csms_base,
            csms,
            profiles,
            default_profile,
            current_price_bits: AtomicU64::new(initial_price.to_bits()),
        })
    }

    fn resolve_profile(&self, name: Option<&str>) -> Result<StationProfile, OcppError> {
        let name = name.unwrap_or(&self.default_profile);
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| OcppError::ValidationError(format!("unknown station profile '{name}'")))
    }

    fn next_free_id(&self, registry: &HashMap<StationId, Arc<StationAgent>>) -> StationId {
        let mut n = 1;
        loop {
            let candidate = format_station_id(n);
            if !registry.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn spawn_agent(&self, id: StationId, profile: StationProfile) -> Arc<StationAgent> {
        let agent = StationAgent::new(id, profile, self.csms_base.clone());
        agent.apply_price(self.get_price());
        agent
    }

    /// Create or tear down agents so exactly `target_count` exist. New
    /// agents get `profile_name`; excess agents are stopped and removed,
    /// highest id first.
    pub async fn scale(&self, target_count: usize, profile_name: &str) -> Result<usize, OcppError> {
        let profile = self.resolve_profile(Some(profile_name))?;

        let current_count = self.registry.read().len();
        if target_count > current_count {
            for _ in current_count..target_count {
                let mut registry = self.registry.write();
                let id = self.next_free_id(&registry);
                let agent = self.spawn_agent(id.clone(), profile.clone());
                registry.insert(id, agent);
            }
        } else if target_count < current_count {
            let mut to_remove: Vec<Arc<StationAgent>> = {
                let mut registry = self.registry.write();
                let mut ids: Vec<StationId> = registry.keys().cloned().collect();
                ids.sort();
                let excess = ids.split_off(target_count);
                excess.iter().filter_map(|id| registry.remove(id)).collect()
            };
            for agent in to_remove.drain(..) {
                agent.stop().await;
            }
        }

        Ok(self.registry.read().len())
    }

    /// Per-station control; idempotent. Creates the agent if it doesn't
    /// exist yet.
    pub async fn start_station(
        &self,
        id: &str,
        profile_name: Option<&str>,
    ) -> Result<StationSnapshot, OcppError> {
        let agent = {
            let mut registry = self.registry.write();
            if let Some(existing) = registry.get(id) {
                existing.clone()
            } else {
                let profile = self.resolve_profile(profile_name)?;
                let agent = self.spawn_agent(id.to_string(), profile);
                registry.insert(id.to_string(), agent.clone());
                agent
            }
        };
        agent.start();
        Ok(agent.snapshot())
    }

    pub async fn stop_station(&self, id: &str) -> Result<StationSnapshot, OcppError> {
        let agent = self
            .registry
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| OcppError::StationNotFound(id.to_string()))?;
        agent.stop().await;
        Ok(agent.snapshot())
    }

    /// Batch-start every registered agent with bounded concurrency and a
    /// per-step stagger to avoid a thundering herd on the CSMS (spec §4.5).
    pub async fn start_all(&self) -> usize {
        let agents: Vec<Arc<StationAgent>> = self.registry.read().values().cloned().collect();
        self.run_batched(agents, |agent| async move {
            agent.start();
        })
        .await
    }

    pub async fn stop_all(&self) -> usize {
        let agents: Vec<Arc<StationAgent>> = self.registry.read().values().cloned().collect();
        self.run_batched(agents, |agent| async move {
            agent.stop().await;
        })
        .await
    }

    async fn run_batched<F, Fut>(&self, agents: Vec<Arc<StationAgent>>, op: F) -> usize
    where
        F: Fn(Arc<StationAgent>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let count = agents.len();
        let semaphore = Arc::new(Semaphore::new(BATCH_CONCURRENCY));
        let op = Arc::new(op);
        let mut handles = Vec::with_capacity(count);

        for agent in agents {
            let semaphore = semaphore.clone();
            let op = op.clone();
            tokio::time::sleep(BATCH_STAGGER).await;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                op(agent).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        count
    }

    pub fn set_price(&self, new_price: f64) -> Result<f64, OcppError> {
        if !new_price.is_finite() || new_price < 0.0 {
            return Err(OcppError::ValidationError("price must be a non-negative finite number".to_string()));
        }
        self.current_price_bits.store(new_price.to_bits(), Ordering::Relaxed);
        for agent in self.registry.read().values() {
            agent.apply_price(new_price);
        }
        Ok(new_price)
    }

    pub fn get_price(&self) -> f64 {
        f64::from_bits(self.current_price_bits.load(Ordering::Relaxed))
    }

    pub fn get_snapshot(&self) -> Vec<StationSnapshot> {
        self.registry.read().values().map(|a| a.snapshot()).collect()
    }

    pub fn get_totals(&self) -> FleetTotals {
        let price = self.get_price();
        let snapshots = self.get_snapshot();
        let total_energy_kwh: f64 = snapshots.iter().map(|s| s.energy_kwh).sum();
        FleetTotals {
            total_energy_kwh,
            total_earnings: total_energy_kwh * price,
            station_count: snapshots.len(),
            charging_count: snapshots
                .iter()
                .filter(|s| s.connector_status == crate::domain::ConnectorStatus::Charging)
                .count(),
        }
    }

    pub fn get_station_logs(&self, id: &str) -> Result<Vec<String>, OcppError> {
        self.registry
            .read()
            .get(id)
            .map(|a| a.logs())
            .ok_or_else(|| OcppError::StationNotFound(id.to_string()))
    }

    pub fn station_exists(&self, id: &str) -> bool {
        self.registry.read().contains_key(id)
    }

    // -- CSMS-helper facades, routed by id (spec §4.5) --------------------

    pub async fn send_charging_profile(
        &self,
        id: &str,
        connector_id: i32,
        profile: ChargingProfile,
    ) -> Result<SetChargingProfileResponse, OcppError> {
        self.require_station(id)?;
        self.csms.send_charging_profile(id, connector_id, profile).await
    }

    pub async fn get_composite_schedule(
        &self,
        id: &str,
        connector_id: i32,
        duration: i64,
        unit: Option<ChargingRateUnit>,
    ) -> Result<GetCompositeScheduleResponse, OcppError> {
        self.require_station(id)?;
        self.csms.get_composite_schedule(id, connector_id, duration, unit).await
    }

    pub async fn clear_charging_profile(
        &self,
        id: &str,
        filter: ClearChargingProfileRequest,
    ) -> Result<ClearChargingProfileResponse, OcppError> {
        self.require_station(id)?;
        self.csms.clear_charging_profile(id, filter).await
    }

    pub async fn send_test_profile(
        &self,
        id: &str,
        scenario: TestProfileScenario,
    ) -> Result<SetChargingProfileResponse, OcppError> {
        self.require_station(id)?;
        match scenario {
            TestProfileScenario::PeakShaving { connector_id, max_w } => {
                self.csms.send_peak_shaving(id, connector_id, max_w).await
            }
            TestProfileScenario::TimeOfUse {
                connector_id,
                off_peak_w,
                peak_w,
                peak_start_secs,
                peak_end_secs,
            } => {
                self.csms
                    .send_time_of_use(id, connector_id, off_peak_w, peak_w, peak_start_secs, peak_end_secs)
                    .await
            }
            TestProfileScenario::EnergyCap { connector_id, transaction_id, max_wh, duration_secs, power_w } => {
                self.csms
                    .send_energy_cap(id, connector_id, transaction_id, max_wh, duration_secs, power_w)
                    .await
            }
        }
    }

    fn require_station(&self, id: &str) -> Result<(), OcppError> {
        if self.station_exists(id) {
            Ok(())
        } else {
            Err(OcppError::StationNotFound(id.to_string()))
        }
    }

    /// Stop every agent and wait for each to close its WebSocket cleanly.
    pub async fn shutdown(&self) {
        let agents: Vec<Arc<StationAgent>> = self.registry.read().values().cloned().collect();
        for agent in agents {
            agent.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csms::Registry;

    fn test_manager() -> Arc<StationManager> {
        let mut profiles = HashMap::new();
        profiles.insert("default".to_string(), StationProfile::default_named("default"));
        let csms = Arc::new(CsmsBackend::new(Registry::new(vec![])));
        StationManager::new(
            "ws://127.0.0.1:9999".to_string(),
            csms,
            profiles,
            "default".to_string(),
            20.0,
        )
    }

    #[tokio::test]
    async fn scale_up_assigns_sequential_ids() {
        let manager = test_manager();
        let count = manager.scale(3, "default").await.unwrap();
        assert_eq!(count, 3);
        let ids: Vec<String> = manager.get_snapshot().into_iter().map(|s| s.id).collect();
        assert!(ids.contains(&"PY-SIM-0001".to_string()));
        assert!(ids.contains(&"PY-SIM-0003".to_string()));
    }

    #[tokio::test]
    async fn scale_down_removes_highest_ids_first() {
        let manager = test_manager();
        manager.scale(3, "default").await.unwrap();
        manager.scale(1, "default").await.unwrap();
        let ids: Vec<String> = manager.get_snapshot().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["PY-SIM-0001".to_string()]);
    }

    #[tokio::test]
    async fn scale_rejects_unknown_profile() {
        let manager = test_manager();
        let err = manager.scale(1, "does-not-exist").await.unwrap_err();
        assert!(matches!(err, OcppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn stop_unknown_station_returns_not_found() {
        let manager = test_manager();
        let err = manager.stop_station("PY-SIM-9999").await.unwrap_err();
        assert!(matches!(err, OcppError::StationNotFound(_)));
    }

    #[tokio::test]
    async fn set_price_rejects_negative_values() {
        let manager = test_manager();
        let err = manager.set_price(-1.0).unwrap_err();
        assert!(matches!(err, OcppError::ValidationError(_)));
        assert_eq!(manager.get_price(), 20.0);
    }

    #[tokio::test]
    async fn get_totals_on_empty_fleet_is_zero() {
        let manager = test_manager();
        let totals = manager.get_totals();
        assert_eq!(totals.station_count, 0);
        assert_eq!(totals.total_energy_kwh, 0.0);
    }

    #[tokio::test]
    async fn csms_facade_reports_station_not_found_before_contacting_csms() {
        let manager = test_manager();
        let err = manager
            .send_test_profile("PY-SIM-0001", TestProfileScenario::PeakShaving { connector_id: 1, max_w: 7400.0 })
            .await
            .unwrap_err();
        assert!(matches!(err, OcppError::StationNotFound(_)));
    }
}
