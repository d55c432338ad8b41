//! Versioned-document convergence
//!
//! Converges the default version of a versioned document to a desired JSON
//! payload under a provider-imposed bound on retained versions.
//!
//! The no-op check runs before any history listing or mutation: the history
//! is finite, so every needless version burns a slot.

use std::sync::Arc;

use componator_common::document::documents_equal;
use componator_common::{Error, Result, DEFAULT_MAX_POLICY_VERSIONS, MIN_POLICY_VERSIONS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cancel::cancellable;
use crate::history::eviction_candidate;
use crate::provider::DocumentProvider;

/// Result of one document convergence pass
#[derive(Debug)]
pub struct VersionOutcome {
    /// Active version when the pass ended; `None` if it could not be read
    pub version_id: Option<String>,
    /// Whether a new version was created
    pub changed: bool,
    /// Versions deleted to make room, oldest first
    pub evicted_version_ids: Vec<String>,
    /// The failure that ended the pass early, if any
    pub error: Option<Error>,
}

impl VersionOutcome {
    /// True when the pass ran to completion
    pub fn is_converged(&self) -> bool {
        self.error.is_none()
    }

    fn failed(version_id: Option<String>, evicted: Vec<String>, error: Error) -> Self {
        Self {
            version_id,
            changed: false,
            evicted_version_ids: evicted,
            error: Some(error),
        }
    }
}

/// Drives the default version of one parent's document to a desired payload
#[derive(Clone)]
pub struct DocumentVersionManager {
    provider: Arc<dyn DocumentProvider>,
    max_versions: usize,
}

impl DocumentVersionManager {
    /// Create a manager with the default history bound
    pub fn new(provider: Arc<dyn DocumentProvider>) -> Self {
        Self {
            provider,
            max_versions: DEFAULT_MAX_POLICY_VERSIONS,
        }
    }

    /// Create a manager with an explicit history bound
    ///
    /// Fails when the bound is below [`MIN_POLICY_VERSIONS`]: the default
    /// version is never evicted, so a smaller history cannot take a new one.
    pub fn with_max_versions(
        provider: Arc<dyn DocumentProvider>,
        max_versions: usize,
    ) -> Result<Self> {
        if max_versions < MIN_POLICY_VERSIONS {
            return Err(Error::validation_for_field(
                "settings",
                "maxPolicyVersions",
                format!("maxPolicyVersions must be at least {MIN_POLICY_VERSIONS}"),
            ));
        }
        Ok(Self {
            provider,
            max_versions,
        })
    }

    /// History bound this manager enforces
    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    /// Run one convergence pass
    ///
    /// When the history is at or over the bound, the oldest non-default
    /// versions are deleted one at a time until a new version fits. If only
    /// the default would remain to delete, the pass fails without creating.
    #[instrument(skip(self, desired, cancel))]
    pub async fn reconcile(
        &self,
        parent: &str,
        desired: &str,
        cancel: &CancellationToken,
    ) -> VersionOutcome {
        let fetched = cancellable(cancel, parent, || {
            self.provider.get_default_document(parent)
        })
        .await;
        let current = match fetched {
            Ok(current) => current,
            Err(e) => {
                warn!(parent = %parent, error = %e, "Failed to read default document");
                return VersionOutcome::failed(None, Vec::new(), e);
            }
        };

        let current_content = current.content.as_deref().unwrap_or_default();
        if documents_equal(current_content, desired) {
            debug!(parent = %parent, version = %current.version_id, "Document unchanged");
            return VersionOutcome {
                version_id: Some(current.version_id),
                changed: false,
                evicted_version_ids: Vec::new(),
                error: None,
            };
        }

        info!(
            parent = %parent,
            version = %current.version_id,
            "Document changed, creating new version"
        );

        let listed = cancellable(cancel, parent, || self.provider.list_versions(parent)).await;
        let mut history = match listed {
            Ok(history) => history,
            Err(e) => {
                warn!(parent = %parent, error = %e, "Failed to list versions");
                return VersionOutcome::failed(Some(current.version_id), Vec::new(), e);
            }
        };

        let mut evicted = Vec::new();
        while history.len() >= self.max_versions {
            let Some(candidate) = eviction_candidate(&history, self.max_versions) else {
                let e = Error::validation_for_field(
                    parent,
                    "maxPolicyVersions",
                    format!(
                        "{} versions retained and none can be evicted under a bound of {}",
                        history.len(),
                        self.max_versions
                    ),
                );
                warn!(parent = %parent, error = %e, "History cannot make room");
                return VersionOutcome::failed(Some(current.version_id), evicted, e);
            };
            let version_id = candidate.version_id.clone();

            let deleted = cancellable(cancel, parent, || {
                self.provider.delete_version(parent, &version_id)
            })
            .await;
            match deleted {
                Ok(()) => {
                    info!(parent = %parent, version = %version_id, "Evicted oldest version");
                }
                Err(e) if e.is_not_found() => {
                    debug!(parent = %parent, version = %version_id, "Version already deleted");
                }
                Err(e) => {
                    warn!(
                        parent = %parent,
                        version = %version_id,
                        error = %e,
                        "Eviction failed"
                    );
                    return VersionOutcome::failed(Some(current.version_id), evicted, e);
                }
            }
            history.retain(|v| v.version_id != version_id);
            evicted.push(version_id);
        }

        if evicted.is_empty() {
            debug!(
                parent = %parent,
                versions = history.len(),
                max = self.max_versions,
                "Version count under limit, no eviction needed"
            );
        }

        let created = cancellable(cancel, parent, || {
            self.provider.create_version(parent, desired)
        })
        .await;
        match created {
            Ok(version_id) => {
                info!(parent = %parent, version = %version_id, "Created new default version");
                VersionOutcome {
                    version_id: Some(version_id),
                    changed: true,
                    evicted_version_ids: evicted,
                    error: None,
                }
            }
            Err(e) => {
                warn!(parent = %parent, error = %e, "Failed to create version");
                VersionOutcome::failed(Some(current.version_id), evicted, e)
            }
        }
    }
}
