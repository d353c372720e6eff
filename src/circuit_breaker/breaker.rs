use super::types::{
    BreakerConfig, BreakerMetrics, BreakerStatus, CircuitState, Decision, Denial, Outcome,
    Transition, TransitionReason,
};
use super::window::FailureWindow;
use crate::error::{BreakerError, Result};
use crate::notifier::{self, NoopNotifier, StateChangeNotifier};
use crate::persistence::BreakerSnapshot;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit breaker for a single named resource
///
/// All reads and writes of the mutable state go through one mutex, so every
/// `evaluate` and `report_outcome` is a single critical section. Neither
/// method blocks on I/O; transitions are delivered to the notifier after the
/// lock is released.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Resource identifier
    name: String,
    /// Configuration, fixed for the breaker's lifetime
    config: BreakerConfig,
    /// Mutable state
    state: Mutex<State>,
    /// Transition sink
    notifier: Arc<dyn StateChangeNotifier>,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    /// Recent failures, only meaningful while closed
    failures: FailureWindow,
    metrics: BreakerMetrics,
}

/// Circuit state together with the data each state requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open {
        tripped_at: DateTime<Utc>,
    },
    HalfOpen {
        tripped_at: DateTime<Utc>,
        trial_in_flight: bool,
    },
}

impl Phase {
    fn circuit_state(&self) -> CircuitState {
        match self {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    fn tripped_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Phase::Closed => None,
            Phase::Open { tripped_at } | Phase::HalfOpen { tripped_at, .. } => Some(*tripped_at),
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self> {
        Self::with_notifier(name, config, Arc::new(NoopNotifier))
    }

    /// Create a new circuit breaker reporting transitions to `notifier`
    pub fn with_notifier(
        name: impl Into<String>,
        config: BreakerConfig,
        notifier: Arc<dyn StateChangeNotifier>,
    ) -> Result<Self> {
        let name = name.into();
        config
            .validate()
            .map_err(|e| BreakerError::Config(format!("breaker '{}': {}", name, e)))?;
        Ok(Self::from_validated(name, config, notifier))
    }

    /// Build from a config that has already passed `validate`
    pub(crate) fn from_validated(
        name: String,
        config: BreakerConfig,
        notifier: Arc<dyn StateChangeNotifier>,
    ) -> Self {
        info!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            window_secs = config.window_secs,
            cooldown_secs = config.cooldown_secs,
            "Creating circuit breaker"
        );

        Self {
            name,
            config,
            state: Mutex::new(State {
                phase: Phase::Closed,
                failures: FailureWindow::new(),
                metrics: BreakerMetrics::default(),
            }),
            notifier,
        }
    }

    /// Rebuild a breaker from a persisted snapshot
    ///
    /// A trial that was in flight when the snapshot was taken is not carried
    /// over: a half-open snapshot restores with the trial slot free.
    pub fn from_snapshot(
        snapshot: BreakerSnapshot,
        notifier: Arc<dyn StateChangeNotifier>,
    ) -> Result<Self> {
        let invalid = |reason: &str| BreakerError::InvalidSnapshot {
            name: snapshot.name.clone(),
            reason: reason.to_string(),
        };

        snapshot.config.validate().map_err(|e| invalid(&e.to_string()))?;

        let phase = match (snapshot.state, snapshot.trip_time) {
            (CircuitState::Closed, None) => Phase::Closed,
            (CircuitState::Open, Some(tripped_at)) => Phase::Open { tripped_at },
            (CircuitState::HalfOpen, Some(tripped_at)) => Phase::HalfOpen {
                tripped_at,
                trial_in_flight: false,
            },
            (CircuitState::Closed, Some(_)) => return Err(invalid("closed with a trip time")),
            (_, None) => return Err(invalid("tripped without a trip time")),
        };
        if let Some(tripped_at) = phase.tripped_at() {
            if tripped_at
                .checked_add_signed(snapshot.config.cooldown_delta())
                .is_none()
            {
                return Err(invalid("trip time too far in the future"));
            }
        }
        let failures = match phase {
            Phase::Closed => FailureWindow::from_timestamps(snapshot.failures),
            _ => FailureWindow::new(),
        };

        debug!(
            breaker = %snapshot.name,
            state = %snapshot.state,
            failures = failures.len(),
            "Restoring circuit breaker from snapshot"
        );

        let breaker = Self::from_validated(snapshot.name, snapshot.config, notifier);
        {
            let mut state = breaker.state.lock();
            state.phase = phase;
            state.failures = failures;
        }
        Ok(breaker)
    }

    /// Decide whether a call may proceed at `now`
    pub fn evaluate(&self, now: DateTime<Utc>) -> Decision {
        match self.try_admit(now) {
            Ok(decision) => decision,
            Err(_) => Decision::Deny,
        }
    }

    /// Like `evaluate`, but a denial carries its payload
    ///
    /// The payload is read in the same critical section as the decision, so
    /// it always describes the state that caused the denial.
    pub fn try_admit(&self, now: DateTime<Utc>) -> std::result::Result<Decision, Denial> {
        let (admission, transition) = {
            let mut state = self.state.lock();
            let (decision, transition) = self.evaluate_locked(&mut state, now);
            let admission = match decision {
                Decision::Deny => Err(self.denial_locked(&state, now)),
                decision => Ok(decision),
            };
            (admission, transition)
        };

        if let Some(transition) = transition {
            self.notify(&transition);
        }
        admission
    }

    fn evaluate_locked(
        &self,
        state: &mut State,
        now: DateTime<Utc>,
    ) -> (Decision, Option<Transition>) {
        match state.phase {
            Phase::Closed => {
                state.failures.prune(now, self.config.window_delta());
                state.metrics.total_requests += 1;
                (Decision::Allow, None)
            }
            Phase::Open { tripped_at } => {
                let cooled_down = self
                    .reopens_at(tripped_at)
                    .is_some_and(|reopens_at| now >= reopens_at);
                if !cooled_down {
                    state.metrics.rejected_requests += 1;
                    debug!(
                        breaker = %self.name,
                        retry_after = ?self.retry_after_locked(state.phase, now),
                        "Circuit breaker open, denying call"
                    );
                    return (Decision::Deny, None);
                }

                let transition = self.transition_to_half_open(state, tripped_at, now);
                state.phase = Phase::HalfOpen {
                    tripped_at,
                    trial_in_flight: true,
                };
                state.metrics.total_requests += 1;
                state.metrics.trial_requests += 1;
                (Decision::AllowTrial, Some(transition))
            }
            Phase::HalfOpen {
                tripped_at,
                trial_in_flight: false,
            } => {
                state.phase = Phase::HalfOpen {
                    tripped_at,
                    trial_in_flight: true,
                };
                state.metrics.total_requests += 1;
                state.metrics.trial_requests += 1;
                debug!(breaker = %self.name, "Admitting half-open trial call");
                (Decision::AllowTrial, None)
            }
            Phase::HalfOpen {
                trial_in_flight: true,
                ..
            } => {
                state.metrics.rejected_requests += 1;
                debug!(
                    breaker = %self.name,
                    "Trial call already in flight, denying call"
                );
                (Decision::Deny, None)
            }
        }
    }

    /// Record the outcome of a call admitted by `evaluate`
    ///
    /// `was_trial` must be true exactly when the admission was `AllowTrial`.
    pub fn report_outcome(&self, now: DateTime<Utc>, outcome: Outcome, was_trial: bool) {
        let transition = {
            let mut state = self.state.lock();
            match outcome {
                Outcome::Success => state.metrics.successful_requests += 1,
                Outcome::Failure => state.metrics.failed_requests += 1,
            }
            self.report_locked(&mut state, now, outcome, was_trial)
        };

        if let Some(transition) = transition {
            self.notify(&transition);
        }
    }

    fn report_locked(
        &self,
        state: &mut State,
        now: DateTime<Utc>,
        outcome: Outcome,
        was_trial: bool,
    ) -> Option<Transition> {
        match (state.phase, was_trial, outcome) {
            (Phase::HalfOpen { .. }, true, Outcome::Success) => {
                Some(self.transition_to_closed(state, TransitionReason::TrialSucceeded, now))
            }
            (Phase::HalfOpen { .. }, true, Outcome::Failure) => {
                warn!(breaker = %self.name, "Trial call failed, reopening circuit");
                Some(self.transition_to_open(state, TransitionReason::TrialFailed, now))
            }
            (phase, true, _) => {
                // An administrative reset landed while the trial was running
                debug!(
                    breaker = %self.name,
                    state = %phase.circuit_state(),
                    "Ignoring trial outcome outside half-open state"
                );
                None
            }
            (Phase::Closed, false, Outcome::Success) => {
                state.failures.prune(now, self.config.window_delta());
                None
            }
            (Phase::Closed, false, Outcome::Failure) => {
                state.failures.record(now);
                state.failures.prune(now, self.config.window_delta());
                let failures = u32::try_from(state.failures.len()).unwrap_or(u32::MAX);

                debug!(
                    breaker = %self.name,
                    failures,
                    threshold = self.config.failure_threshold,
                    "Call failed in closed state"
                );

                if failures >= self.config.failure_threshold {
                    Some(self.transition_to_open(
                        state,
                        TransitionReason::FailureThreshold { failures },
                        now,
                    ))
                } else {
                    None
                }
            }
            (phase, false, outcome) => {
                // Admitted while closed, finished after another call tripped
                // the circuit. Counted, but never moves the trip time.
                debug!(
                    breaker = %self.name,
                    state = %phase.circuit_state(),
                    ?outcome,
                    "Outcome reported after circuit left closed state"
                );
                None
            }
        }
    }

    /// Force the breaker back to closed, clearing all failure history
    pub fn reset(&self, now: DateTime<Utc>) {
        let transition = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Closed => {
                    state.failures.clear();
                    None
                }
                _ => Some(self.transition_to_closed(&mut state, TransitionReason::Reset, now)),
            }
        };

        if let Some(transition) = transition {
            self.notify(&transition);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.state.lock().phase.circuit_state()
    }

    /// Time of the most recent trip, `None` while closed
    pub fn trip_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().phase.tripped_at()
    }

    pub fn trial_in_flight(&self) -> bool {
        matches!(
            self.state.lock().phase,
            Phase::HalfOpen {
                trial_in_flight: true,
                ..
            }
        )
    }

    /// Failures currently held in the window (not pruned by this call)
    pub fn failure_count(&self) -> usize {
        self.state.lock().failures.len()
    }

    /// Get metrics
    pub fn metrics(&self) -> BreakerMetrics {
        self.state.lock().metrics.clone()
    }

    /// Time left until a trial call can be admitted, zero unless open
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        let phase = self.state.lock().phase;
        self.retry_after_locked(phase, now)
    }

    /// Payload describing why a call at `now` would be denied
    pub fn denial(&self, now: DateTime<Utc>) -> Denial {
        let state = self.state.lock();
        self.denial_locked(&state, now)
    }

    /// Consistent view of the breaker at `now`, with the window pruned
    pub fn status(&self, now: DateTime<Utc>) -> BreakerStatus {
        let mut state = self.state.lock();
        if state.phase == Phase::Closed {
            state.failures.prune(now, self.config.window_delta());
        }
        BreakerStatus {
            name: self.name.clone(),
            state: state.phase.circuit_state(),
            failures: state.failures.len(),
            retry_after: self.denial_locked(&state, now).retry_after,
            metrics: state.metrics.clone(),
        }
    }

    /// Point-in-time copy of the persistent part of the state
    pub fn snapshot(&self, now: DateTime<Utc>) -> BreakerSnapshot {
        let state = self.state.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: state.phase.circuit_state(),
            failures: state.failures.to_vec(),
            trip_time: state.phase.tripped_at(),
            config: self.config.clone(),
            saved_at: now,
        }
    }

    /// End of the cooldown, `None` when it is past the representable range
    fn reopens_at(&self, tripped_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        tripped_at.checked_add_signed(self.config.cooldown_delta())
    }

    // An unrepresentable deadline means the circuit stays open.
    fn retry_after_locked(&self, phase: Phase, now: DateTime<Utc>) -> Duration {
        match phase {
            Phase::Open { tripped_at } => remaining(
                self.reopens_at(tripped_at)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
                now,
            ),
            _ => Duration::ZERO,
        }
    }

    fn denial_locked(&self, state: &State, now: DateTime<Utc>) -> Denial {
        Denial::new(
            state.phase.circuit_state(),
            self.retry_after_locked(state.phase, now),
        )
    }

    fn notify(&self, transition: &Transition) {
        notifier::dispatch(self.notifier.as_ref(), transition);
    }

    /// Transition to open state
    fn transition_to_open(
        &self,
        state: &mut State,
        reason: TransitionReason,
        now: DateTime<Utc>,
    ) -> Transition {
        let from = state.phase.circuit_state();
        info!(
            breaker = %self.name,
            %from,
            %reason,
            cooldown_secs = self.config.cooldown_secs,
            "Circuit breaker opening"
        );

        state.phase = Phase::Open { tripped_at: now };
        state.failures.clear();
        state.metrics.circuit_opened_count += 1;
        self.transition(from, CircuitState::Open, reason, now)
    }

    /// Transition to half-open state
    fn transition_to_half_open(
        &self,
        state: &mut State,
        tripped_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Transition {
        info!(
            breaker = %self.name,
            %tripped_at,
            cooldown_secs = self.config.cooldown_secs,
            "Circuit breaker transitioning to half-open"
        );

        state.metrics.circuit_half_opened_count += 1;
        self.transition(
            CircuitState::Open,
            CircuitState::HalfOpen,
            TransitionReason::CooldownElapsed,
            now,
        )
    }

    /// Transition to closed state
    fn transition_to_closed(
        &self,
        state: &mut State,
        reason: TransitionReason,
        now: DateTime<Utc>,
    ) -> Transition {
        let from = state.phase.circuit_state();
        info!(breaker = %self.name, %from, %reason, "Circuit breaker closing");

        state.phase = Phase::Closed;
        state.failures.clear();
        state.metrics.circuit_closed_count += 1;
        self.transition(from, CircuitState::Closed, reason, now)
    }

    fn transition(
        &self,
        from: CircuitState,
        to: CircuitState,
        reason: TransitionReason,
        at: DateTime<Utc>,
    ) -> Transition {
        Transition {
            name: self.name.clone(),
            from,
            to,
            reason,
            at,
        }
    }
}

fn remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}
