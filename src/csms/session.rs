#![allow(dead_code)]
//! Per-session CSMS-side mirror of the station agent's envelope machinery
//! (spec §4.4: "mirrors the C3 envelope machinery"). Owns the write-half
//! sink, the pending map for CSMS-originated calls, and the per-station
//! serialization of those calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::error::OcppError;
use crate::ocpp::Envelope;

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingCall {
    reply: oneshot::Sender<Result<Value, OcppError>>,
}

/// One charge point's live WebSocket session, from the CSMS's point of view.
pub struct CsmsSession {
    station_id: String,
    sink: mpsc::Sender<Message>,
    pending: Mutex<HashMap<String, PendingCall>>,
    /// Serializes CSMS-originated calls: only one in flight per station at
    /// a time, excess callers queue behind it (spec §5).
    call_lock: AsyncMutex<()>,
}

impl CsmsSession {
    pub fn new(station_id: String, sink: mpsc::Sender<Message>) -> Arc<Self> {
        Arc::new(Self {
            station_id,
            sink,
            pending: Mutex::new(HashMap::new()),
            call_lock: AsyncMutex::new(()),
        })
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    /// If `envelope` resolves an outstanding CSMS-originated call, resolve
    /// it and report `true`. Otherwise the caller should treat it as an
    /// inbound CALL from the station.
    pub fn resolve_reply(&self, envelope: &Envelope) -> bool {
        match envelope {
            Envelope::CallResult(result) => {
                if let Some(pending) = self.pending.lock().remove(&result.message_id) {
                    let _ = pending.reply.send(Ok(result.payload.clone()));
                    return true;
                }
                false
            }
            Envelope::CallError(error) => {
                if let Some(pending) = self.pending.lock().remove(&error.message_id) {
                    let _ = pending.reply.send(Err(OcppError::CallError {
                        code: error.error_code.clone(),
                        description: error.error_description.clone(),
                    }));
                    return true;
                }
                false
            }
            Envelope::Call(_) => false,
        }
    }

    /// Issue a CSMS-originated CALL and await the station's reply, or
    /// `CallTimeout` after 30 s.
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, OcppError> {
        let _permit = self.call_lock.lock().await;

        let message_id = Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(message_id.clone(), PendingCall { reply: reply_tx });

        let envelope = Envelope::call(message_id.clone(), action, payload);
        if let Err(e) = self.send_envelope(envelope).await {
            self.pending.lock().remove(&message_id);
            return Err(e);
        }

        match tokio::time::timeout(CALL_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OcppError::Cancelled),
            Err(_) => {
                self.pending.lock().remove(&message_id);
                Err(OcppError::CallTimeout)
            }
        }
    }

    /// Encode and send any envelope (CALL, CALLRESULT, or CALLERROR).
    pub async fn send_envelope(&self, envelope: Envelope) -> Result<(), OcppError> {
        let wire = envelope
            .to_wire()
            .map_err(|e| OcppError::ProtocolViolation(e.to_string()))?;
        self.sink
            .send(Message::Text(wire))
            .await
            .map_err(|_| OcppError::StationDisconnected(self.station_id.clone()))
    }

    /// Fail every outstanding CSMS-originated call, e.g. on disconnect.
    pub fn fail_all_pending(&self, err: OcppError) {
        let mut pending = self.pending.lock();
        for (_, req) in pending.drain() {
            let _ = req.reply.send(Err(err.clone()));
        }
    }

    #[cfg(test)]
    pub fn new_for_test(sink: mpsc::Sender<Message>) -> Arc<Self> {
        Self::new("TEST-STATION".to_string(), sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_fails_fast_when_sink_is_closed() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let session = CsmsSession::new_for_test(tx);
        let result = session.call("Reset", serde_json::json!({})).await;
        assert!(matches!(result, Err(OcppError::StationDisconnected(_))));
    }

    #[test]
    fn fail_all_pending_drains_without_panicking_when_empty() {
        let (tx, _rx) = mpsc::channel(4);
        let session = CsmsSession::new_for_test(tx);
        session.fail_all_pending(OcppError::Cancelled);
    }

    #[test]
    fn resolve_reply_ignores_unmatched_message_id() {
        let (tx, _rx) = mpsc::channel(4);
        let session = CsmsSession::new_for_test(tx);
        let envelope = Envelope::call_result("no-such-id", serde_json::json!({}));
        assert!(!session.resolve_reply(&envelope));
    }
}
