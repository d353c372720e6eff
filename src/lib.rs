pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notifier;
pub mod persistence;

pub use circuit_breaker::{
    BreakerConfig, BreakerRegistry, CallGate, CircuitBreaker, CircuitState, Decision, Denial,
    GateResponse, Outcome,
};
pub use error::{BreakerError, Result};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "circuit_gate=info".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
