pub mod station;

pub use station::*;
