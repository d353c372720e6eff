use crate::circuit_breaker::types::{CircuitState, Transition};
use crate::notifier::{NotifierError, StateChangeNotifier};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use tracing::debug;

/// How a gated call was served, used as the `result` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateCallResult {
    /// Operation ran and was classified a success
    Success,
    /// Operation ran and was classified a failure
    Failure,
    /// Denied, fallback produced a value
    Degraded,
    /// Denied, fallback failed too
    FallbackError,
    /// Caller dropped the call before the operation finished
    Abandoned,
}

impl GateCallResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateCallResult::Success => "success",
            GateCallResult::Failure => "failure",
            GateCallResult::Degraded => "degraded",
            GateCallResult::FallbackError => "fallback_error",
            GateCallResult::Abandoned => "abandoned",
        }
    }
}

/// Register all metrics with descriptions
///
/// Call once after installing a recorder; recording works without it.
pub fn describe_metrics() {
    describe_gauge!(
        "circuit_breaker_state",
        "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
    );
    describe_counter!(
        "circuit_breaker_transitions_total",
        "Total number of circuit breaker state transitions"
    );
    describe_counter!(
        "circuit_gate_calls_total",
        "Total number of calls routed through the gate, by result"
    );

    debug!("All metrics registered with descriptions");
}

/// Record circuit breaker state
pub fn record_circuit_breaker_state(breaker: &str, state: CircuitState) {
    let labels = [("breaker", breaker.to_string())];
    gauge!("circuit_breaker_state", &labels).set(f64::from(state.as_gauge()));
}

/// Record circuit breaker transition
pub fn record_circuit_breaker_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    let labels = [
        ("breaker", breaker.to_string()),
        ("from", from.as_str().to_string()),
        ("to", to.as_str().to_string()),
    ];
    counter!("circuit_breaker_transitions_total", &labels).increment(1);
}

/// Record one gated call
pub fn record_gate_call(breaker: &str, result: GateCallResult) {
    let labels = [
        ("breaker", breaker.to_string()),
        ("result", result.as_str().to_string()),
    ];
    counter!("circuit_gate_calls_total", &labels).increment(1);
}

/// Publishes transitions through the `metrics` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsNotifier;

impl StateChangeNotifier for MetricsNotifier {
    fn on_transition(&self, transition: &Transition) -> Result<(), NotifierError> {
        record_circuit_breaker_transition(&transition.name, transition.from, transition.to);
        record_circuit_breaker_state(&transition.name, transition.to);
        Ok(())
    }
}
