#![allow(dead_code)]
//! `axum` WebSocket upgrade endpoint for the CSMS backend (spec §4.4).
//!
//! One upgraded connection per station, routed by path segment. The read
//! loop plays the mirror role of `station::transport`'s read loop: it
//! either resolves a pending CSMS-originated call via
//! `CsmsSession::resolve_reply`, or dispatches the inbound CALL through the
//! static action table in `dispatch`.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::ocpp::messages::{
    AuthorizeRequest, AuthorizeResponse, BootNotificationRequest, BootNotificationResponse,
    HeartbeatResponse, IdTagInfo, MeterValuesRequest, MeterValuesResponse, RegistrationStatus,
    StartTransactionRequest, StartTransactionResponse, StatusNotificationRequest,
    StatusNotificationResponse, StopTransactionRequest, StopTransactionResponse,
};
use crate::ocpp::{Call, Envelope, ErrorCode};

use super::registry::Registry;
use super::session::CsmsSession;

#[derive(Debug, Clone)]
pub struct CsmsConfig {
    pub heartbeat_interval_secs: i64,
    /// If a station reconnects while a session is still registered, replace
    /// it instead of rejecting the new connection (spec §4.4 point 1).
    pub replace_existing: bool,
}

impl Default for CsmsConfig {
    fn default() -> Self {
        Self { heartbeat_interval_secs: 300, replace_existing: false }
    }
}

#[derive(Clone)]
pub struct CsmsState {
    pub registry: Arc<Registry>,
    pub config: CsmsConfig,
}

pub fn router(state: CsmsState) -> Router {
    Router::new()
        .route("/ocpp/:station_id", get(upgrade))
        .with_state(state)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Path(station_id): Path<String>,
    State(state): State<CsmsState>,
) -> impl IntoResponse {
    ws.protocols(["ocpp1.6"])
        .on_upgrade(move |socket| handle_socket(socket, station_id, state))
}

async fn handle_socket(socket: WebSocket, station_id: String, state: CsmsState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    if state.registry.is_connected(&station_id) && !state.config.replace_existing {
        warn!(station_id, "rejecting duplicate OCPP session");
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: 1008,
                reason: "station already connected".into(),
            })))
            .await;
        return;
    }

    let (send_tx, mut send_rx) = mpsc::channel::<Message>(64);
    tokio::spawn(async move {
        while let Some(msg) = send_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let session = CsmsSession::new(station_id.clone(), send_tx);
    if let Err(e) = state
        .registry
        .register(&station_id, session.clone(), state.config.replace_existing)
    {
        warn!(station_id, error = %e, "rejecting duplicate OCPP session");
        return;
    }
    info!(station_id, "station connected");

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_frame(&text, &station_id, &state, &session).await,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.registry.unregister(&station_id);
    info!(station_id, "station disconnected");
}

async fn handle_frame(text: &str, station_id: &str, state: &CsmsState, session: &Arc<CsmsSession>) {
    let envelope = match Envelope::from_wire(text) {
        Ok(e) => e,
        Err(e) => {
            warn!(station_id, error = %e, "malformed OCPP frame");
            return;
        }
    };

    if session.resolve_reply(&envelope) {
        return;
    }

    if let Envelope::Call(Call { message_id, action, payload }) = envelope {
        let reply = dispatch(&action, payload, station_id, state).await;
        let wire = match reply {
            Ok(payload) => Envelope::call_result(message_id, payload),
            Err((code, description)) => {
                Envelope::call_error(message_id, code.to_string(), description, Value::Null)
            }
        };
        if let Err(e) = session.send_envelope(wire).await {
            warn!(station_id, error = %e, "failed to send reply");
        }
    }
}

type DispatchError = (ErrorCode, String);

/// Static `action -> handler` table for charge-point-originated actions
/// (spec §9: "replace any reflection-based action dispatch with a static
/// table"). No handler performs blocking I/O; all state lives in `Registry`.
async fn dispatch(
    action: &str,
    payload: Value,
    station_id: &str,
    state: &CsmsState,
) -> Result<Value, DispatchError> {
    match action {
        "BootNotification" => {
            let _req: BootNotificationRequest = parse(payload)?;
            ok(BootNotificationResponse {
                status: RegistrationStatus::Accepted,
                current_time: Utc::now(),
                interval: state.config.heartbeat_interval_secs,
            })
        }
        "Heartbeat" => {
            state.registry.record_heartbeat(station_id, Utc::now());
            ok(HeartbeatResponse { current_time: Utc::now() })
        }
        "Authorize" => {
            let req: AuthorizeRequest = parse(payload)?;
            ok(AuthorizeResponse { id_tag_info: authorize(state, &req.id_tag) })
        }
        "StartTransaction" => {
            let req: StartTransactionRequest = parse(payload)?;
            let id_tag_info = authorize(state, &req.id_tag);
            let transaction_id = state.registry.start_transaction(
                station_id,
                req.connector_id,
                &req.id_tag,
                req.meter_start,
                req.timestamp,
            );
            ok(StartTransactionResponse { transaction_id, id_tag_info })
        }
        "MeterValues" => {
            let _req: MeterValuesRequest = parse(payload)?;
            ok(MeterValuesResponse {})
        }
        "StopTransaction" => {
            let req: StopTransactionRequest = parse(payload)?;
            state
                .registry
                .stop_transaction(req.transaction_id, req.meter_stop, req.timestamp);
            ok(StopTransactionResponse { id_tag_info: None })
        }
        "StatusNotification" => {
            let req: StatusNotificationRequest = parse(payload)?;
            state.registry.record_status(station_id, req.status);
            ok(StatusNotificationResponse {})
        }
        other => Err((
            ErrorCode::NotImplemented,
            format!("no handler for action '{other}'"),
        )),
    }
}

fn authorize(state: &CsmsState, id_tag: &str) -> IdTagInfo {
    if state.registry.is_blocked(id_tag) {
        IdTagInfo::blocked()
    } else {
        IdTagInfo::accepted()
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, DispatchError> {
    serde_json::from_value(payload).map_err(|e| (ErrorCode::FormationViolation, e.to_string()))
}

fn ok<T: serde::Serialize>(value: T) -> Result<Value, DispatchError> {
    serde_json::to_value(value).map_err(|e| (ErrorCode::InternalError, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn boot_notification_is_accepted() {
        let state = CsmsState { registry: Registry::new(vec![]), config: CsmsConfig::default() };
        let reply = dispatch(
            "BootNotification",
            serde_json::to_value(BootNotificationRequest {
                charge_point_vendor: "Sim".to_string(),
                charge_point_model: "SIM-CP".to_string(),
                charge_point_serial_number: None,
                charge_box_serial_number: None,
                firmware_version: None,
                iccid: None,
                imsi: None,
                meter_type: None,
                meter_serial_number: None,
            })
            .unwrap(),
            "PY-SIM-0001",
            &state,
        )
        .await
        .unwrap();
        assert_eq!(reply["status"], "Accepted");
    }

    #[tokio::test]
    async fn authorize_blocks_blocklisted_id_tag() {
        let state = CsmsState {
            registry: Registry::new(vec!["BAD-TAG".to_string()]),
            config: CsmsConfig::default(),
        };
        let reply = dispatch(
            "Authorize",
            serde_json::json!({"idTag": "BAD-TAG"}),
            "PY-SIM-0001",
            &state,
        )
        .await
        .unwrap();
        assert_eq!(reply["idTagInfo"]["status"], "Blocked");
    }

    #[tokio::test]
    async fn start_transaction_allocates_increasing_ids() {
        let state = CsmsState { registry: Registry::new(vec![]), config: CsmsConfig::default() };
        let payload = serde_json::json!({
            "connectorId": 1,
            "idTag": "TAG",
            "meterStart": 0,
            "timestamp": Utc::now(),
        });
        let first = dispatch("StartTransaction", payload.clone(), "PY-SIM-0001", &state)
            .await
            .unwrap();
        let second = dispatch("StartTransaction", payload, "PY-SIM-0001", &state)
            .await
            .unwrap();
        assert!(second["transactionId"].as_i64().unwrap() > first["transactionId"].as_i64().unwrap());
    }

    #[tokio::test]
    async fn unknown_action_is_not_implemented() {
        let state = CsmsState { registry: Registry::new(vec![]), config: CsmsConfig::default() };
        let err = dispatch("DataTransfer", serde_json::json!({}), "PY-SIM-0001", &state)
            .await
            .unwrap_err();
        assert_eq!(err.0, ErrorCode::NotImplemented);
    }
}
