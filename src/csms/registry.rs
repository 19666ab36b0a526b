#![allow(dead_code)]
//! CSMS-side session registry and transaction-id allocator (C4).
//!
//! The registry is the only state shared across sessions: a single
//! `RwLock<HashMap<...>>` (small map, read-optimized, per §9) plus an
//! atomic transaction-id counter. Everything else about one station's
//! session — pending CSMS-originated calls — lives in its own
//! `CsmsSession`, never here (session isolation, spec §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::ConnectorStatus;
use crate::error::OcppError;

use super::session::CsmsSession;

#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub station_id: String,
    pub connector_id: i32,
    pub id_tag: String,
    pub meter_start: i64,
    pub start_time: DateTime<Utc>,
    pub meter_stop: Option<i64>,
    pub stop_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct StationRecord {
    pub last_status: Option<ConnectorStatus>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<CsmsSession>>>,
    records: RwLock<HashMap<String, StationRecord>>,
    transactions: RwLock<HashMap<i64, TransactionRecord>>,
    next_transaction_id: AtomicI64,
    id_tag_blocklist: Vec<String>,
}

impl Registry {
    pub fn new(id_tag_blocklist: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
            next_transaction_id: AtomicI64::new(1),
            id_tag_blocklist,
        })
    }

    pub fn is_blocked(&self, id_tag: &str) -> bool {
        self.id_tag_blocklist.iter().any(|t| t == id_tag)
    }

    /// Register a freshly connected session, unless one is already present
    /// for this station id and the caller hasn't asked to replace it (spec
    /// §4.4: reject with 409 / close 1008 unless configured to replace).
    pub fn register(
        &self,
        station_id: &str,
        session: Arc<CsmsSession>,
        replace_existing: bool,
    ) -> Result<(), OcppError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(station_id) && !replace_existing {
            return Err(OcppError::Rejected(format!(
                "station '{station_id}' already connected"
            )));
        }
        sessions.insert(station_id.to_string(), session);
        self.records.write().entry(station_id.to_string()).or_default();
        Ok(())
    }

    /// Remove the registry entry and fail any pending CSMS-originated
    /// calls against it (spec §4.4 point 5).
    pub fn unregister(&self, station_id: &str) {
        if let Some(session) = self.sessions.write().remove(station_id) {
            session.fail_all_pending(OcppError::StationDisconnected(station_id.to_string()));
        }
    }

    pub fn session(&self, station_id: &str) -> Option<Arc<CsmsSession>> {
        self.sessions.read().get(station_id).cloned()
    }

    pub fn is_connected(&self, station_id: &str) -> bool {
        self.sessions.read().contains_key(station_id)
    }

    pub fn record_status(&self, station_id: &str, status: ConnectorStatus) {
        self.records
            .write()
            .entry(station_id.to_string())
            .or_default()
            .last_status = Some(status);
    }

    pub fn record_heartbeat(&self, station_id: &str, at: DateTime<Utc>) {
        self.records
            .write()
            .entry(station_id.to_string())
            .or_default()
            .last_heartbeat = Some(at);
    }

    pub fn last_status(&self, station_id: &str) -> Option<ConnectorStatus> {
        self.records.read().get(station_id).and_then(|r| r.last_status)
    }

    pub fn allocate_transaction_id(&self) -> i64 {
        self.next_transaction_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn start_transaction(
        &self,
        station_id: &str,
        connector_id: i32,
        id_tag: &str,
        meter_start: i64,
        start_time: DateTime<Utc>,
    ) -> i64 {
        let tx_id = self.allocate_transaction_id();
        self.transactions.write().insert(
            tx_id,
            TransactionRecord {
                station_id: station_id.to_string(),
                connector_id,
                id_tag: id_tag.to_string(),
                meter_start,
                start_time,
                meter_stop: None,
                stop_time: None,
            },
        );
        tx_id
    }

    pub fn stop_transaction(&self, transaction_id: i64, meter_stop: i64, stop_time: DateTime<Utc>) {
        if let Some(record) = self.transactions.write().get_mut(&transaction_id) {
            record.meter_stop = Some(meter_stop);
            record.stop_time = Some(stop_time);
        }
    }

    pub fn transaction(&self, transaction_id: i64) -> Option<TransactionRecord> {
        self.transactions.read().get(&transaction_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn dummy_session() -> Arc<CsmsSession> {
        let (tx, _rx) = mpsc::channel(1);
        CsmsSession::new_for_test(tx)
    }

    #[test]
    fn allocates_monotonically_increasing_transaction_ids() {
        let registry = Registry::new(vec![]);
        let a = registry.allocate_transaction_id();
        let b = registry.allocate_transaction_id();
        assert!(b > a);
    }

    #[test]
    fn blocklisted_id_tags_are_blocked() {
        let registry = Registry::new(vec!["BAD-TAG".to_string()]);
        assert!(registry.is_blocked("BAD-TAG"));
        assert!(!registry.is_blocked("GOOD-TAG"));
    }

    #[test]
    fn register_rejects_duplicate_unless_replace() {
        let registry = Registry::new(vec![]);
        registry.register("PY-SIM-0001", dummy_session(), false).unwrap();
        let err = registry
            .register("PY-SIM-0001", dummy_session(), false)
            .unwrap_err();
        assert!(matches!(err, OcppError::Rejected(_)));
        assert!(registry.register("PY-SIM-0001", dummy_session(), true).is_ok());
    }

    #[test]
    fn unregister_removes_entry_and_fails_pending_calls() {
        let registry = Registry::new(vec![]);
        registry.register("PY-SIM-0001", dummy_session(), false).unwrap();
        assert!(registry.is_connected("PY-SIM-0001"));
        registry.unregister("PY-SIM-0001");
        assert!(!registry.is_connected("PY-SIM-0001"));
    }

    #[test]
    fn start_then_stop_transaction_round_trips() {
        let registry = Registry::new(vec![]);
        let now = Utc::now();
        let tx_id = registry.start_transaction("PY-SIM-0001", 1, "TAG", 0, now);
        registry.stop_transaction(tx_id, 10_000, now);
        let record = registry.transaction(tx_id).unwrap();
        assert_eq!(record.meter_stop, Some(10_000));
    }
}
