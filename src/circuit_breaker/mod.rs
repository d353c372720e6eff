pub mod breaker;
pub mod classifier;
pub mod gate;
pub mod registry;
pub mod types;
pub mod window;

pub use breaker::CircuitBreaker;
pub use classifier::{DefaultClassifier, ErrorMarker, ErrorOnlyClassifier, OutcomeClassifier};
pub use gate::{CallGate, GateResponse};
pub use registry::BreakerRegistry;
pub use types::{
    BreakerConfig, BreakerMetrics, BreakerStatus, CircuitState, Decision, Denial, Outcome,
    Transition, TransitionReason,
};
pub use window::FailureWindow;
