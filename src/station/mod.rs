pub mod agent;
pub mod logbuf;
pub mod transport;

pub use agent::StationAgent;
