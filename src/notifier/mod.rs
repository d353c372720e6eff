//! Observers for breaker state changes.
//!
//! Breakers call their notifier synchronously, once per transition, from the
//! call that caused it and after the breaker's lock has been released.
//! Notifier errors and panics are logged here and never reach the caller.

use crate::circuit_breaker::types::{CircuitState, Transition};
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Error reported by a notifier sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Notifier error: {0}")]
pub struct NotifierError(pub String);

/// Sink for breaker transitions (logging, metrics, alerting)
pub trait StateChangeNotifier: Send + Sync + Debug {
    fn on_transition(&self, transition: &Transition) -> Result<(), NotifierError>;
}

/// Run a notifier, turning a panic into a [`NotifierError`]
pub fn invoke(
    notifier: &dyn StateChangeNotifier,
    transition: &Transition,
) -> Result<(), NotifierError> {
    match panic::catch_unwind(AssertUnwindSafe(|| notifier.on_transition(transition))) {
        Ok(result) => result,
        Err(_) => Err(NotifierError(format!(
            "notifier panicked while handling {} -> {}",
            transition.from, transition.to
        ))),
    }
}

/// Deliver a transition and swallow any failure after logging it
pub(crate) fn dispatch(notifier: &dyn StateChangeNotifier, transition: &Transition) {
    if let Err(e) = invoke(notifier, transition) {
        warn!(
            breaker = %transition.name,
            from = %transition.from,
            to = %transition.to,
            error = %e,
            "State change notifier failed"
        );
    }
}

/// Discards every transition
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl StateChangeNotifier for NoopNotifier {
    fn on_transition(&self, _transition: &Transition) -> Result<(), NotifierError> {
        Ok(())
    }
}

/// Writes one structured log line per transition
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl StateChangeNotifier for TracingNotifier {
    fn on_transition(&self, transition: &Transition) -> Result<(), NotifierError> {
        if transition.to == CircuitState::Open {
            warn!(
                breaker = %transition.name,
                from = %transition.from,
                to = %transition.to,
                reason = %transition.reason,
                at = %transition.at,
                "Circuit breaker opened"
            );
        } else {
            info!(
                breaker = %transition.name,
                from = %transition.from,
                to = %transition.to,
                reason = %transition.reason,
                at = %transition.at,
                "Circuit breaker state changed"
            );
        }
        Ok(())
    }
}

/// Fans a transition out to several sinks
///
/// Every sink sees every transition even when an earlier one fails; the
/// failures are joined into a single error.
#[derive(Debug, Clone, Default)]
pub struct CompositeNotifier {
    sinks: Vec<Arc<dyn StateChangeNotifier>>,
}

impl CompositeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn StateChangeNotifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl StateChangeNotifier for CompositeNotifier {
    fn on_transition(&self, transition: &Transition) -> Result<(), NotifierError> {
        let errors: Vec<String> = self
            .sinks
            .iter()
            .filter_map(|sink| invoke(sink.as_ref(), transition).err())
            .map(|e| e.0)
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotifierError(errors.join("; ")))
        }
    }
}
