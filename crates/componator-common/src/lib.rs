//! Common types for componator handlers: errors, error classification,
//! semantic document comparison and telemetry setup

#![deny(missing_docs)]

pub mod classify;
pub mod document;
pub mod error;
pub mod telemetry;

pub use classify::{DefaultClassifier, ErrorClass, ErrorClassifier};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of retained versions of a managed policy document
///
/// AWS IAM rejects version creation once five versions exist, so one
/// non-default version has to be evicted first.
pub const DEFAULT_MAX_POLICY_VERSIONS: usize = 5;

/// Smallest usable history bound
///
/// The default version is never evicted, so a bound of one leaves no room
/// for the replacement.
pub const MIN_POLICY_VERSIONS: usize = 2;

/// Default path for IAM roles and policies
pub const DEFAULT_IAM_PATH: &str = "/";

/// Default maximum session duration for IAM roles, in seconds
pub const DEFAULT_MAX_SESSION_DURATION: i32 = 3600;
