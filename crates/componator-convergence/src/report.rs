//! Caller-visible results of a handler step
//!
//! Every report carries the status to persist, including on failure, so
//! that visible resource status tracks true remote state.

use std::fmt;

use componator_common::{Error, ErrorClass, ErrorClassifier};
use tracing::{debug, warn};

/// Where a handler step left the resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportPhase {
    /// Fully converged
    Converged,
    /// Step accepted, the provider is still settling
    InProgress,
    /// Transient failure; reschedule and resume from persisted status
    RetryableFailure,
    /// Terminal failure; needs operator attention before retrying
    PermanentFailure,
}

impl fmt::Display for ReportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportPhase::Converged => "Converged",
            ReportPhase::InProgress => "InProgress",
            ReportPhase::RetryableFailure => "RetryableFailure",
            ReportPhase::PermanentFailure => "PermanentFailure",
        };
        f.write_str(s)
    }
}

/// Outcome of a handler step together with the status to persist
#[derive(Debug)]
pub struct ConvergenceReport<S> {
    /// Status reflecting the observed remote state
    pub status: S,
    /// Phase for the scheduler
    pub phase: ReportPhase,
    /// Human-readable summary
    pub details: Option<String>,
    /// Failure that produced a failure phase
    pub error: Option<Error>,
}

impl<S> ConvergenceReport<S> {
    /// Fully converged
    pub fn success(status: S, details: impl Into<String>) -> Self {
        Self {
            status,
            phase: ReportPhase::Converged,
            details: Some(details.into()),
            error: None,
        }
    }

    /// Still settling; check again later
    pub fn in_progress(status: S, details: impl Into<String>) -> Self {
        Self {
            status,
            phase: ReportPhase::InProgress,
            details: Some(details.into()),
            error: None,
        }
    }

    /// Terminal failure regardless of classification (config errors)
    pub fn permanent(status: S, error: Error) -> Self {
        warn!(resource = ?error.resource(), error = %error, "Permanent failure");
        Self {
            details: Some(error.to_string()),
            status,
            phase: ReportPhase::PermanentFailure,
            error: Some(error),
        }
    }

    /// Failure classified by the injected classifier
    pub fn for_error(status: S, error: Error, classifier: &dyn ErrorClassifier) -> Self {
        let phase = match classifier.classify(&error) {
            ErrorClass::Retryable => ReportPhase::RetryableFailure,
            ErrorClass::Permanent => ReportPhase::PermanentFailure,
        };
        warn!(
            resource = ?error.resource(),
            error = %error,
            phase = %phase,
            "Convergence step failed"
        );
        Self {
            details: Some(error.to_string()),
            status,
            phase,
            error: Some(error),
        }
    }

    /// Success with `details`, or a classified failure when `error` is set
    pub fn settle(
        status: S,
        error: Option<Error>,
        details: impl Into<String>,
        classifier: &dyn ErrorClassifier,
    ) -> Self {
        match error {
            None => {
                let report = Self::success(status, details);
                debug!(details = ?report.details, "Convergence step succeeded");
                report
            }
            Some(e) => Self::for_error(status, e, classifier),
        }
    }

    /// True when the resource is converged
    pub fn is_converged(&self) -> bool {
        self.phase == ReportPhase::Converged
    }

    /// True when the scheduler should reschedule without operator action
    pub fn should_requeue(&self) -> bool {
        matches!(
            self.phase,
            ReportPhase::InProgress | ReportPhase::RetryableFailure
        )
    }
}
