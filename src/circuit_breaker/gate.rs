use super::breaker::CircuitBreaker;
use super::classifier::{DefaultClassifier, ErrorMarker, OutcomeClassifier};
use super::registry::BreakerRegistry;
use super::types::{Denial, Outcome};
use crate::clock::Clock;
use crate::config::GateConfig;
use crate::error::{CallTimeout, Result};
use crate::metrics::{self, GateCallResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of a gated call
#[derive(Debug, Clone, PartialEq)]
pub enum GateResponse<T> {
    /// Produced by the protected operation
    Live(T),
    /// Produced by the fallback because the circuit denied the call
    Degraded { value: T, denial: Denial },
}

impl<T> GateResponse<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, GateResponse::Degraded { .. })
    }

    pub fn value(&self) -> &T {
        match self {
            GateResponse::Live(value) | GateResponse::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            GateResponse::Live(value) | GateResponse::Degraded { value, .. } => value,
        }
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            GateResponse::Live(_) => None,
            GateResponse::Degraded { denial, .. } => Some(denial),
        }
    }
}

/// Admission for one protected call
///
/// Reports the call's outcome exactly once: through `complete`, or as a
/// failure when dropped first (the caller abandoned the call).
#[derive(Debug)]
pub(crate) struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    trial: bool,
    reported: bool,
}

impl CallPermit {
    fn new(breaker: Arc<CircuitBreaker>, clock: Arc<dyn Clock>, trial: bool) -> Self {
        Self {
            breaker,
            clock,
            trial,
            reported: false,
        }
    }

    pub fn complete(mut self, outcome: Outcome) {
        self.report(outcome);
    }

    fn report(&mut self, outcome: Outcome) {
        if self.reported {
            return;
        }
        self.reported = true;
        self.breaker
            .report_outcome(self.clock.now(), outcome, self.trial);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.reported {
            warn!(
                breaker = %self.breaker.name(),
                trial = self.trial,
                "Call abandoned before completion, recording failure"
            );
            metrics::record_gate_call(self.breaker.name(), GateCallResult::Abandoned);
            self.report(Outcome::Failure);
        }
    }
}

enum Admission {
    Admitted(CallPermit),
    Denied(Denial),
}

/// Decorator that routes calls to an operation or its fallback
#[derive(Debug, Clone)]
pub struct CallGate {
    registry: BreakerRegistry,
    /// Deadline applied by `execute_bounded`
    call_timeout: Option<Duration>,
}

impl CallGate {
    pub fn new(registry: BreakerRegistry) -> Self {
        Self {
            registry,
            call_timeout: None,
        }
    }

    /// Build a gate from configuration
    ///
    /// Breakers with explicit configuration are created up front so an
    /// invalid entry fails here rather than on the first call.
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        let registry = config.build_registry()?;
        Ok(Self {
            registry,
            call_timeout: config.call_timeout(),
        })
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &BreakerRegistry {
        &self.registry
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Run `op` through the breaker named `name`, or `fallback` if denied
    ///
    /// Errors from `op` are returned unchanged after being recorded; errors
    /// from `fallback` are returned unchanged too. A denial is never an
    /// error by itself.
    pub async fn execute<T, E, Op, OpFut, Fb, FbFut>(
        &self,
        name: &str,
        op: Op,
        fallback: Fb,
    ) -> std::result::Result<GateResponse<T>, E>
    where
        T: ErrorMarker,
        Op: FnOnce() -> OpFut,
        OpFut: Future<Output = std::result::Result<T, E>>,
        Fb: FnOnce(Denial) -> FbFut,
        FbFut: Future<Output = std::result::Result<T, E>>,
    {
        self.execute_with(name, &DefaultClassifier, op, fallback)
            .await
    }

    /// Like `execute`, with a classifier chosen for this breaker
    pub async fn execute_with<T, E, C, Op, OpFut, Fb, FbFut>(
        &self,
        name: &str,
        classifier: &C,
        op: Op,
        fallback: Fb,
    ) -> std::result::Result<GateResponse<T>, E>
    where
        C: OutcomeClassifier<T, E> + ?Sized,
        Op: FnOnce() -> OpFut,
        OpFut: Future<Output = std::result::Result<T, E>>,
        Fb: FnOnce(Denial) -> FbFut,
        FbFut: Future<Output = std::result::Result<T, E>>,
    {
        let permit = match self.admit(name) {
            Admission::Admitted(permit) => permit,
            Admission::Denied(denial) => return run_fallback(name, denial, fallback).await,
        };

        let result = op().await;
        let outcome = classifier.classify(&result);
        finish(name, permit, outcome);
        result.map(GateResponse::Live)
    }

    /// Like `execute`, but gives up on `op` after the gate's call timeout
    ///
    /// On expiry the call is recorded as a failure right away, the pending
    /// operation is dropped, and a [`CallTimeout`] is returned as `E`.
    /// Without a configured timeout this behaves like `execute`.
    pub async fn execute_bounded<T, E, Op, OpFut, Fb, FbFut>(
        &self,
        name: &str,
        op: Op,
        fallback: Fb,
    ) -> std::result::Result<GateResponse<T>, E>
    where
        T: ErrorMarker,
        E: From<CallTimeout>,
        Op: FnOnce() -> OpFut,
        OpFut: Future<Output = std::result::Result<T, E>>,
        Fb: FnOnce(Denial) -> FbFut,
        FbFut: Future<Output = std::result::Result<T, E>>,
    {
        let Some(timeout) = self.call_timeout else {
            return self.execute(name, op, fallback).await;
        };

        let permit = match self.admit(name) {
            Admission::Admitted(permit) => permit,
            Admission::Denied(denial) => return run_fallback(name, denial, fallback).await,
        };

        match tokio::time::timeout(timeout, op()).await {
            Ok(result) => {
                let outcome = DefaultClassifier.classify(&result);
                finish(name, permit, outcome);
                result.map(GateResponse::Live)
            }
            Err(_) => {
                warn!(breaker = name, ?timeout, "Protected call timed out");
                finish(name, permit, Outcome::Failure);
                Err(E::from(CallTimeout {
                    breaker: name.to_string(),
                    timeout,
                }))
            }
        }
    }

    fn admit(&self, name: &str) -> Admission {
        let breaker = self.registry.get(name);
        let now = self.registry.clock().now();

        match breaker.try_admit(now) {
            Err(denial) => {
                warn!(
                    breaker = name,
                    state = %denial.circuit_state,
                    retry_after = denial.retry_after,
                    "Circuit denied call, using fallback"
                );
                Admission::Denied(denial)
            }
            Ok(decision) => {
                debug!(breaker = name, ?decision, "Call admitted");
                Admission::Admitted(CallPermit::new(
                    breaker,
                    self.registry.clock().clone(),
                    decision.is_trial(),
                ))
            }
        }
    }
}

fn finish(name: &str, permit: CallPermit, outcome: Outcome) {
    let result = match outcome {
        Outcome::Success => GateCallResult::Success,
        Outcome::Failure => GateCallResult::Failure,
    };
    metrics::record_gate_call(name, result);
    permit.complete(outcome);
}

async fn run_fallback<T, E, Fb, FbFut>(
    name: &str,
    denial: Denial,
    fallback: Fb,
) -> std::result::Result<GateResponse<T>, E>
where
    Fb: FnOnce(Denial) -> FbFut,
    FbFut: Future<Output = std::result::Result<T, E>>,
{
    match fallback(denial.clone()).await {
        Ok(value) => {
            metrics::record_gate_call(name, GateCallResult::Degraded);
            Ok(GateResponse::Degraded { value, denial })
        }
        Err(e) => {
            warn!(breaker = name, "Fallback failed for denied call");
            metrics::record_gate_call(name, GateCallResult::FallbackError);
            Err(e)
        }
    }
}
