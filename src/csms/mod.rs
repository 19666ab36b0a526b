#![allow(dead_code)]
//! CSMS backend (C4): terminates station WebSocket sessions, answers the
//! charge-point-originated actions, and exposes CSMS-originated
//! smart-charging commands to the control plane.

pub mod commands;
pub mod registry;
pub mod server;
pub mod session;

pub use commands::CsmsBackend;
pub use registry::Registry;
pub use server::{router, CsmsConfig, CsmsState};
pub use session::CsmsSession;
