#![allow(dead_code)]
//! OCPP 1.6J envelope framing.
//!
//! The wire surface is a JSON array of one of three shapes (spec §3):
//!
//! - CALL:       `[2, <MessageId>, <Action>, <Payload>]`
//! - CALLRESULT: `[3, <MessageId>, <Payload>]`
//! - CALLERROR:  `[4, <MessageId>, <ErrorCode>, <ErrorDescription>, <ErrorDetails>]`
//!
//! `Envelope` round-trips bit-exact through `serde_json` via a hand-written
//! `Serialize`/`Deserialize` pair, since serde's derive machinery has no way
//! to express "array whose length and field types depend on a leading tag".

pub mod messages;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// The three OCPP-J envelope shapes, discriminated by `MessageTypeId`.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub message_id: String,
    pub action: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub message_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub message_id: String,
    pub error_code: String,
    pub error_description: String,
    pub error_details: Value,
}

/// Numeric tag identifying which envelope shape follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTypeId {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl Envelope {
    pub fn call(message_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Envelope::Call(Call {
            message_id: message_id.into(),
            action: action.into(),
            payload,
        })
    }

    pub fn call_result(message_id: impl Into<String>, payload: Value) -> Self {
        Envelope::CallResult(CallResult {
            message_id: message_id.into(),
            payload,
        })
    }

    pub fn call_error(
        message_id: impl Into<String>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
        error_details: Value,
    ) -> Self {
        Envelope::CallError(CallError {
            message_id: message_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details,
        })
    }

    pub fn message_id(&self) -> &str {
        match self {
            Envelope::Call(c) => &c.message_id,
            Envelope::CallResult(c) => &c.message_id,
            Envelope::CallError(c) => &c.message_id,
        }
    }

    /// Encode to the wire string sent over the WebSocket.
    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a wire string into an envelope.
    pub fn from_wire(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Envelope::Call(c) => {
                let mut seq = serializer.serialize_seq(Some(4))?;
                seq.serialize_element(&(MessageTypeId::Call as u8))?;
                seq.serialize_element(&c.message_id)?;
                seq.serialize_element(&c.action)?;
                seq.serialize_element(&c.payload)?;
                seq.end()
            }
            Envelope::CallResult(c) => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element(&(MessageTypeId::CallResult as u8))?;
                seq.serialize_element(&c.message_id)?;
                seq.serialize_element(&c.payload)?;
                seq.end()
            }
            Envelope::CallError(c) => {
                let mut seq = serializer.serialize_seq(Some(5))?;
                seq.serialize_element(&(MessageTypeId::CallError as u8))?;
                seq.serialize_element(&c.message_id)?;
                seq.serialize_element(&c.error_code)?;
                seq.serialize_element(&c.error_description)?;
                seq.serialize_element(&c.error_details)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EnvelopeVisitor;

        impl<'de> Visitor<'de> for EnvelopeVisitor {
            type Value = Envelope;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an OCPP-J envelope array")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Envelope, A::Error> {
                let type_id: u8 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let message_id: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;

                match type_id {
                    2 => {
                        let action: String = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                        let payload: Value = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(3, &self))?;
                        Ok(Envelope::Call(Call { message_id, action, payload }))
                    }
                    3 => {
                        let payload: Value = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                        Ok(Envelope::CallResult(CallResult { message_id, payload }))
                    }
                    4 => {
                        let error_code: String = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                        let error_description: String = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(3, &self))?;
                        let error_details: Value = seq.next_element()?.unwrap_or(Value::Null);
                        Ok(Envelope::CallError(CallError {
                            message_id,
                            error_code,
                            error_description,
                            error_details,
                        }))
                    }
                    other => Err(de::Error::custom(format!(
                        "unknown OCPP message type id: {other}"
                    ))),
                }
            }
        }

        deserializer.deserialize_seq(EnvelopeVisitor)
    }
}

/// Standard OCPP CALLERROR codes (spec §6.1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurrenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        };
        write!(f, "{}", s)
    }
}

/// Transport-level WebSocket connection state, shared by both the station
/// agent's client side and the CSMS's per-session server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_round_trips_to_wire_shape() {
        let env = Envelope::call("123", "Heartbeat", json!({}));
        let wire = env.to_wire().unwrap();
        assert_eq!(wire, r#"[2,"123","Heartbeat",{}]"#);
        let back = Envelope::from_wire(&wire).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn call_result_round_trips() {
        let env = Envelope::call_result("abc", json!({"status": "Accepted"}));
        let wire = env.to_wire().unwrap();
        let back = Envelope::from_wire(&wire).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.message_id(), "abc");
    }

    #[test]
    fn call_error_round_trips() {
        let env = Envelope::call_error("xyz", "NotImplemented", "no handler", json!(null));
        let wire = env.to_wire().unwrap();
        let back = Envelope::from_wire(&wire).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn rejects_unknown_message_type() {
        let err = Envelope::from_wire(r#"[9,"1","X",{}]"#).unwrap_err();
        assert!(err.to_string().contains("unknown OCPP message type id"));
    }

    #[test]
    fn rejects_short_arrays() {
        assert!(Envelope::from_wire(r#"[2,"1"]"#).is_err());
    }

    proptest::proptest! {
        #[test]
        fn envelope_call_round_trip_arbitrary(id in "[a-zA-Z0-9]{1,16}", action in "[a-zA-Z]{1,20}") {
            let env = Envelope::call(id, action, json!({"n": 1}));
            let wire = env.to_wire().unwrap();
            let back = Envelope::from_wire(&wire).unwrap();
            assert_eq!(back, env);
        }
    }
}
