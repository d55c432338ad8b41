//! Convergence algorithms for cloud identity resources
//!
//! Two passes drive a single parent resource toward its declared state:
//!
//! - [`AttachmentReconciler`] converges the set of sub-resources attached to
//!   a parent (managed policies on a role), detaching before attaching and
//!   reporting the true attached set even when a call fails partway.
//! - [`DocumentVersionManager`] converges the default version of a versioned
//!   document (a managed policy), evicting the oldest non-default version
//!   when the provider's history bound is reached.
//!
//! Both read live state at the start of every pass, hold nothing between
//! passes, and return partial state alongside the error instead of dropping
//! it. [`ConvergenceReport`] turns either outcome into the shape the
//! external scheduler consumes.
//!
//! Passes for the same parent must not overlap; single-flight execution per
//! resource is the scheduler's responsibility.

#![deny(missing_docs)]

pub mod attachments;
pub mod cancel;
pub mod diff;
pub mod history;
pub mod provider;
pub mod report;
pub mod versions;

pub use attachments::{AttachmentOutcome, AttachmentReconciler};
pub use cancel::cancellable;
pub use diff::{diff, AttachmentDiff};
pub use history::eviction_candidate;
pub use provider::{AttachmentProvider, DocumentProvider, VersionedDocument};
pub use report::{ConvergenceReport, ReportPhase};
pub use versions::{DocumentVersionManager, VersionOutcome};
