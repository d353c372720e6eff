use super::types::Outcome;
use serde_json::Value;

/// Decides whether a finished call counts as a success or a failure
///
/// Implementations must be pure: the same result always maps to the same
/// outcome, and classifying has no side effects.
pub trait OutcomeClassifier<T, E>: Send + Sync {
    fn classify(&self, result: &Result<T, E>) -> Outcome;
}

impl<T, E, F> OutcomeClassifier<T, E> for F
where
    F: Fn(&Result<T, E>) -> Outcome + Send + Sync,
{
    fn classify(&self, result: &Result<T, E>) -> Outcome {
        self(result)
    }
}

/// Application-level error marker carried inside an otherwise successful response
pub trait ErrorMarker {
    fn has_error_marker(&self) -> bool;
}

impl ErrorMarker for Value {
    /// An object with a non-null, non-false `error` field, or `is_error: true`
    fn has_error_marker(&self) -> bool {
        let Some(object) = self.as_object() else {
            return false;
        };
        let error_field = matches!(object.get("error"), Some(v) if !v.is_null() && *v != Value::Bool(false));
        let is_error = matches!(object.get("is_error"), Some(Value::Bool(true)));
        error_field || is_error
    }
}

impl ErrorMarker for String {
    fn has_error_marker(&self) -> bool {
        false
    }
}

impl ErrorMarker for &str {
    fn has_error_marker(&self) -> bool {
        false
    }
}

impl ErrorMarker for () {
    fn has_error_marker(&self) -> bool {
        false
    }
}

impl<T: ErrorMarker> ErrorMarker for Option<T> {
    fn has_error_marker(&self) -> bool {
        self.as_ref().is_some_and(ErrorMarker::has_error_marker)
    }
}

/// Errors, timeouts and marked responses are failures
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl<T: ErrorMarker, E> OutcomeClassifier<T, E> for DefaultClassifier {
    fn classify(&self, result: &Result<T, E>) -> Outcome {
        match result {
            Ok(response) if response.has_error_marker() => Outcome::Failure,
            Ok(_) => Outcome::Success,
            Err(_) => Outcome::Failure,
        }
    }
}

/// Only `Err` counts as a failure
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorOnlyClassifier;

impl<T, E> OutcomeClassifier<T, E> for ErrorOnlyClassifier {
    fn classify(&self, result: &Result<T, E>) -> Outcome {
        if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}
