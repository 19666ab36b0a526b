#![allow(dead_code)]
//! Crate-wide error taxonomy (see spec §7).
//!
//! Transport/call failures are recovered locally by the station agent and
//! never bubble up here; this enum exists for the errors that *do* cross a
//! component boundary — CSMS-originated call outcomes, control-plane
//! validation, and cancellation.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OcppError {
    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("call timed out waiting for a reply")]
    CallTimeout,

    #[error("peer returned CALLERROR: {code} {description}")]
    CallError { code: String, description: String },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("station '{0}' is not connected")]
    StationDisconnected(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("station '{0}' not found")]
    StationNotFound(String),
}
