//! Retryable-vs-permanent classification of handler errors
//!
//! The convergence core never inspects provider error codes itself. Provider
//! adapters map their codes onto [`Error`] variants, and a classifier decides
//! how the scheduler should treat the result.

use crate::Error;

/// How the external scheduler should treat a failed pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient failure, reschedule the pass
    Retryable,
    /// Terminal failure, surface to the operator
    Permanent,
}

/// Decides whether an error is transient or terminal
pub trait ErrorClassifier: Send + Sync {
    /// Classify the given error
    fn classify(&self, err: &Error) -> ErrorClass;
}

/// Classifier that trusts the retryability recorded on the error itself
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, err: &Error) -> ErrorClass {
        if err.is_retryable() {
            ErrorClass::Retryable
        } else {
            ErrorClass::Permanent
        }
    }
}

impl<F> ErrorClassifier for F
where
    F: Fn(&Error) -> ErrorClass + Send + Sync,
{
    fn classify(&self, err: &Error) -> ErrorClass {
        self(err)
    }
}
