#![allow(dead_code)]
//! WebSocket transport for a single station agent (spec §4.3.1, §4.3.2).
//!
//! Owns the socket, a pending-call map keyed by message id, and the
//! reconnect backoff schedule. The lifecycle task drives this through
//! `call()` (request/response) and `send_reply()` (respond to an inbound
//! CALL); the read loop drains inbound frames via `recv()`.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::OcppError;
use crate::ocpp::{Call, Envelope};

pub const SUBPROTOCOL: &str = "ocpp1.6";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// An inbound CALL the read loop could not resolve against the pending map
/// — i.e. a CSMS-originated request awaiting an action handler's reply.
#[derive(Debug, Clone)]
pub struct InboundCall {
    pub message_id: String,
    pub action: String,
    pub payload: Value,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct PendingCall {
    action: String,
    reply: oneshot::Sender<Result<Value, OcppError>>,
}

/// Open connection to the CSMS. Constructed fresh on every successful
/// `connect`; dropped on disconnect.
pub struct Transport {
    sink: mpsc::Sender<Message>,
    pending: Mutex<HashMap<String, PendingCall>>,
}

impl Transport {
    /// Connect to `<csms_base>/<station_id>` and spawn the frame-pump task
    /// that forwards inbound CALLs to `inbound_tx` and resolves pending
    /// calls from CALLRESULT/CALLERROR frames. Returns once the handshake
    /// completes.
    pub async fn connect(
        csms_base: &str,
        station_id: &str,
        inbound_tx: mpsc::Sender<InboundCall>,
    ) -> Result<std::sync::Arc<Self>, OcppError> {
        let url = format!("{}/{}", csms_base.trim_end_matches('/'), station_id);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| OcppError::TransportFailure(e.to_string()))?;
        request
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, SUBPROTOCOL.parse().unwrap());

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| OcppError::TransportFailure(e.to_string()))?;

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (send_tx, mut send_rx) = mpsc::channel::<Message>(64);

        let transport = std::sync::Arc::new(Self {
            sink: send_tx,
            pending: Mutex::new(HashMap::new()),
        });

        tokio::spawn(async move {
            while let Some(msg) = send_rx.recv().await {
                if ws_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let reader = transport.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => reader.handle_frame(&text, &inbound_tx).await,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            reader.fail_all_pending(OcppError::StationDisconnected(station_id.to_string()));
        });

        Ok(transport)
    }

    async fn handle_frame(&self, text: &str, inbound_tx: &mpsc::Sender<InboundCall>) {
        let envelope = match Envelope::from_wire(text) {
            Ok(e) => e,
            Err(e) => {
                warn!("malformed OCPP frame: {e}");
                return;
            }
        };

        match envelope {
            Envelope::Call(Call { message_id, action, payload }) => {
                if inbound_tx.send(InboundCall { message_id, action, payload }).await.is_err() {
                    warn!("inbound call dropped: agent not listening");
                }
            }
            Envelope::CallResult(result) => {
                if let Some(pending) = self.pending.lock().remove(&result.message_id) {
                    let _ = pending.reply.send(Ok(result.payload));
                }
            }
            Envelope::CallError(error) => {
                if let Some(pending) = self.pending.lock().remove(&error.message_id) {
                    let _ = pending.reply.send(Err(OcppError::CallError {
                        code: error.error_code,
                        description: error.error_description,
                    }));
                }
            }
        }
    }

    fn fail_all_pending(&self, err: OcppError) {
        let mut pending = self.pending.lock();
        for (_, req) in pending.drain() {
            let _ = req.reply.send(Err(err.clone()));
        }
    }

    /// Send a CALL and await its matching CALLRESULT/CALLERROR, or
    /// `CallTimeout` after 30 s.
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, OcppError> {
        let message_id = Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(
            message_id.clone(),
            PendingCall { action: action.to_string(), reply: reply_tx },
        );

        let envelope = Envelope::call(message_id.clone(), action, payload);
        let wire = envelope
            .to_wire()
            .map_err(|e| OcppError::ProtocolViolation(e.to_string()))?;

        if self.sink.send(Message::Text(wire.into())).await.is_err() {
            self.pending.lock().remove(&message_id);
            return Err(OcppError::StationDisconnected("socket closed".to_string()));
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

    /// Reply to an inbound CALL with a CALLRESULT.
    pub async fn reply(&self, message_id: &str, payload: Value) -> Result<(), OcppError> {
        let wire = Envelope::call_result(message_id, payload)
            .to_wire()
            .map_err(|e| OcppError::ProtocolViolation(e.to_string()))?;
        self.sink
            .send(Message::Text(wire.into()))
            .await
            .map_err(|_| OcppError::StationDisconnected("socket closed".to_string()))
    }

    /// Close the socket with a clean close frame (code 1000).
    pub async fn close(&self) {
        debug!("closing transport with normal close frame");
        let _ = self.sink.send(Message::Close(None)).await;
        self.fail_all_pending(OcppError::Cancelled);
    }
}

/// Exponential backoff with a 60 s cap and +/-20% jitter (spec §4.3.2).
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = Duration::from_secs(1 << self.attempt.min(6)).min(MAX_BACKOFF);
        self.attempt += 1;
        jitter(base)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

fn jitter(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_secs_f64((base.as_secs_f64() * factor).min(MAX_BACKOFF.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_sixty_seconds() {
        let mut backoff = Backoff::new();
        let mut last = Duration::ZERO;
        for _ in 0..10 {
            let d = backoff.next_delay();
            assert!(d <= MAX_BACKOFF);
            last = d;
        }
        assert!(last <= MAX_BACKOFF);
    }

    #[test]
    fn backoff_reset_restarts_from_first_step() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        let d = backoff.next_delay();
        assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1200));
    }
}
