//! Attachment-set convergence
//!
//! Converges the membership of a parent resource (the managed policies on a
//! role) to a desired set:
//!
//! 1. Read the live membership. A failure here mutates nothing and reports
//!    the caller's last known set.
//! 2. Diff desired against live. An empty diff returns immediately.
//! 3. Detach everything that should go, one call at a time, in sorted order.
//! 4. Attach everything that is missing, one call at a time, in sorted order.
//!
//! The first failing call ends the pass. The outcome always carries the set
//! that is actually attached at that moment, counting only calls that
//! completed, so the caller can persist it and the next pass resumes from
//! true state.

use std::collections::BTreeSet;
use std::sync::Arc;

use componator_common::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cancel::cancellable;
use crate::diff::diff;
use crate::provider::AttachmentProvider;

/// Result of one attachment convergence pass
#[derive(Debug)]
pub struct AttachmentOutcome {
    /// Membership that is actually attached when the pass ended
    pub attached: BTreeSet<String>,
    /// Attach calls that completed during this pass
    pub attached_count: usize,
    /// Detach calls that completed during this pass
    pub detached_count: usize,
    /// The failure that ended the pass early, if any
    pub error: Option<Error>,
}

impl AttachmentOutcome {
    /// True when the pass ran to completion
    pub fn is_converged(&self) -> bool {
        self.error.is_none()
    }

    /// True when the pass attached or detached anything
    pub fn changed(&self) -> bool {
        self.attached_count > 0 || self.detached_count > 0
    }

    /// Attached identifiers in sorted order, ready to persist as status
    pub fn attached_list(&self) -> Vec<String> {
        self.attached.iter().cloned().collect()
    }
}

/// Drives the attached membership of one parent resource to a desired set
#[derive(Clone)]
pub struct AttachmentReconciler {
    provider: Arc<dyn AttachmentProvider>,
}

impl AttachmentReconciler {
    /// Create a reconciler over the given provider
    pub fn new(provider: Arc<dyn AttachmentProvider>) -> Self {
        Self { provider }
    }

    /// Run one convergence pass
    ///
    /// `last_known` is the membership the caller last persisted. It is only
    /// reported back when the live membership cannot be read.
    #[instrument(skip(self, desired, last_known, cancel), fields(desired = desired.len()))]
    pub async fn reconcile(
        &self,
        parent: &str,
        desired: &[String],
        last_known: &[String],
        cancel: &CancellationToken,
    ) -> AttachmentOutcome {
        let desired: BTreeSet<String> = desired.iter().cloned().collect();

        let listed = cancellable(cancel, parent, || self.provider.list_attached(parent)).await;
        let current = match listed {
            Ok(current) => current.into_iter().collect::<BTreeSet<_>>(),
            Err(e) => {
                warn!(parent = %parent, error = %e, "Failed to list attachments");
                return AttachmentOutcome {
                    attached: last_known.iter().cloned().collect(),
                    attached_count: 0,
                    detached_count: 0,
                    error: Some(e),
                };
            }
        };

        let changes = diff(&desired, &current);
        if changes.is_empty() {
            debug!(parent = %parent, "Attachments already in desired state");
            return AttachmentOutcome {
                attached: current,
                attached_count: 0,
                detached_count: 0,
                error: None,
            };
        }

        let mut outcome = AttachmentOutcome {
            attached: current,
            attached_count: 0,
            detached_count: 0,
            error: None,
        };

        // Shrink membership before growing it
        for id in &changes.to_detach {
            info!(parent = %parent, id = %id, "Detaching");
            match cancellable(cancel, parent, || self.provider.detach(parent, id)).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(parent = %parent, id = %id, "Already detached");
                }
                Err(e) => {
                    warn!(parent = %parent, id = %id, error = %e, "Detach failed");
                    outcome.error = Some(e);
                    return outcome;
                }
            }
            outcome.attached.remove(id);
            outcome.detached_count += 1;
        }

        for id in &changes.to_attach {
            info!(parent = %parent, id = %id, "Attaching");
            let attached = cancellable(cancel, parent, || self.provider.attach(parent, id)).await;
            if let Err(e) = attached {
                warn!(parent = %parent, id = %id, error = %e, "Attach failed");
                outcome.error = Some(e);
                return outcome;
            }
            outcome.attached.insert(id.clone());
            outcome.attached_count += 1;
        }

        info!(
            parent = %parent,
            attached = outcome.attached_count,
            detached = outcome.detached_count,
            "Attachments reconciled"
        );
        outcome
    }
}
