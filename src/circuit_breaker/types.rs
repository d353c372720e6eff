use crate::error::{BreakerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for configured durations (one year)
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through to the protected operation
    Closed,
    /// Calls are denied and routed to the fallback
    Open,
    /// A single trial call probes for recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    /// Gauge encoding: 0 = closed, 1 = open, 2 = half-open
    pub fn as_gauge(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission decision for a single call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Closed circuit, run the operation
    Allow,
    /// Run the operation as the single recovery trial
    AllowTrial,
    /// Do not run the operation, use the fallback
    Deny,
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Decision::Deny)
    }

    pub fn is_trial(&self) -> bool {
        matches!(self, Decision::AllowTrial)
    }
}

/// Classified result of a protected call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures within the window that trip the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Length of the sliding failure window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Time the circuit stays open before a trial call is allowed
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_window_secs() -> u64 {
    60
}

fn default_cooldown_secs() -> u64 {
    300
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, window_secs: u64, cooldown_secs: u64) -> Self {
        Self {
            failure_threshold,
            window_secs,
            cooldown_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Reject configurations that can never behave sensibly
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(BreakerError::Config(
                "failure_threshold must be > 0".to_string(),
            ));
        }
        if self.window_secs == 0 {
            return Err(BreakerError::Config("window_secs must be > 0".to_string()));
        }
        if self.cooldown_secs == 0 {
            return Err(BreakerError::Config(
                "cooldown_secs must be > 0".to_string(),
            ));
        }
        if self.window_secs > MAX_DURATION_SECS || self.cooldown_secs > MAX_DURATION_SECS {
            return Err(BreakerError::Config(format!(
                "window_secs and cooldown_secs must be <= {}",
                MAX_DURATION_SECS
            )));
        }
        Ok(())
    }

    // Both deltas are in range once `validate` has passed.
    pub(crate) fn window_delta(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs.min(MAX_DURATION_SECS) as i64)
    }

    pub(crate) fn cooldown_delta(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs.min(MAX_DURATION_SECS) as i64)
    }
}

/// Circuit breaker metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerMetrics {
    /// Calls admitted to the protected operation
    pub total_requests: u64,
    /// Outcomes classified as success
    pub successful_requests: u64,
    /// Outcomes classified as failure
    pub failed_requests: u64,
    /// Calls denied and routed to the fallback
    pub rejected_requests: u64,
    /// Trial calls admitted while half-open
    pub trial_requests: u64,
    /// Number of times circuit opened
    pub circuit_opened_count: u64,
    /// Number of times circuit half-opened
    pub circuit_half_opened_count: u64,
    /// Number of times circuit closed
    pub circuit_closed_count: u64,
}

/// Read-only summary of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    /// Failures inside the window at the time of the status
    pub failures: usize,
    /// Seconds until a trial may be admitted
    pub retry_after: u64,
    pub metrics: BreakerMetrics,
}

/// Why a transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionReason {
    /// Failures in the window reached the threshold
    FailureThreshold { failures: u32 },
    /// Cooldown expired, first trial admitted
    CooldownElapsed,
    TrialSucceeded,
    TrialFailed,
    /// Administrative reset
    Reset,
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionReason::FailureThreshold { failures } => {
                write!(f, "failure threshold reached ({} failures)", failures)
            }
            TransitionReason::CooldownElapsed => write!(f, "cooldown elapsed"),
            TransitionReason::TrialSucceeded => write!(f, "trial call succeeded"),
            TransitionReason::TrialFailed => write!(f, "trial call failed"),
            TransitionReason::Reset => write!(f, "administrative reset"),
        }
    }
}

/// A single state change of a named breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: TransitionReason,
    pub at: DateTime<Utc>,
}

/// Payload describing a denied call
///
/// Handed to the fallback and attached to degraded responses so downstream
/// tooling can tell a breaker-induced fallback from a genuine result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    /// State of the circuit when the call was denied
    pub circuit_state: CircuitState,
    /// Seconds until a trial call may be admitted, rounded up
    pub retry_after: u64,
    /// Always true, marks the payload as a fallback
    pub fallback: bool,
}

impl Denial {
    pub fn new(circuit_state: CircuitState, retry_after: Duration) -> Self {
        let whole = retry_after.as_secs();
        let retry_after = if retry_after.subsec_nanos() > 0 {
            whole.saturating_add(1)
        } else {
            whole
        };
        Self {
            circuit_state,
            retry_after,
            fallback: true,
        }
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    #[test]
    fn test_circuit_state_serializes_like_display() {
        let value = serde_json::to_value(CircuitState::HalfOpen).unwrap();
        assert_eq!(value, json!("HALF_OPEN"));
    }

    #[test]
    fn test_default_config() {
        let config = BreakerConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.window_secs, 60);
        assert_eq!(config.cooldown_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_zero_values() {
        assert!(BreakerConfig::new(0, 60, 300).validate().is_err());
        assert!(BreakerConfig::new(3, 0, 300).validate().is_err());
        assert!(BreakerConfig::new(3, 60, 0).validate().is_err());
        assert!(BreakerConfig::new(3, MAX_DURATION_SECS + 1, 300)
            .validate()
            .is_err());
        assert!(BreakerConfig::new(1, 1, 1).validate().is_ok());
    }

    #[test]
    fn test_config_partial_yaml_uses_defaults() {
        let config: BreakerConfig = serde_yaml::from_str("failure_threshold: 5").unwrap();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.window(), Duration::from_secs(60));
        assert_eq!(config.cooldown(), Duration::from_secs(300));
    }

    #[test]
    fn test_denial_payload_shape() {
        let denial = Denial::new(CircuitState::Open, Duration::from_millis(4200));
        assert_json_eq!(
            serde_json::to_value(&denial).unwrap(),
            json!({
                "circuit_state": "OPEN",
                "retry_after": 5,
                "fallback": true
            })
        );
        assert_eq!(denial.retry_after(), Duration::from_secs(5));
    }

    #[test]
    fn test_decision_helpers() {
        assert!(Decision::Allow.is_admitted());
        assert!(Decision::AllowTrial.is_admitted());
        assert!(Decision::AllowTrial.is_trial());
        assert!(!Decision::Deny.is_admitted());
        assert!(!Decision::Allow.is_trial());
    }

    #[test]
    fn test_transition_reason_display() {
        assert_eq!(
            TransitionReason::FailureThreshold { failures: 3 }.to_string(),
            "failure threshold reached (3 failures)"
        );
        assert_eq!(TransitionReason::TrialFailed.to_string(), "trial call failed");
    }
}
