pub mod breaker;
pub mod client;

pub use breaker::{CircuitBreaker, CircuitState};
pub use client::{default_feature_flags, ControlPlaneClient, ControlPlaneState};
