//! Provider boundary consumed by the convergence passes
//!
//! Implementations wrap a concrete cloud SDK client. They map provider error
//! codes onto [`Error`]: a missing entity becomes [`Error::NotFound`], and
//! retryability is recorded on [`Error::Provider`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use componator_common::Error;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// One version of a versioned document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedDocument {
    /// Provider-assigned version identifier (e.g., "v3")
    pub version_id: String,
    /// JSON document body; history listings carry metadata only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Whether this is the active version
    pub is_default: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Trait abstracting membership operations on a parent resource
///
/// This trait allows mocking the provider in tests while using the real
/// SDK client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AttachmentProvider: Send + Sync {
    /// List the identifiers currently attached to the parent
    async fn list_attached(&self, parent: &str) -> Result<Vec<String>, Error>;

    /// Attach a sub-resource to the parent
    async fn attach(&self, parent: &str, id: &str) -> Result<(), Error>;

    /// Detach a sub-resource from the parent
    ///
    /// Returns [`Error::NotFound`] when the item is not attached.
    async fn detach(&self, parent: &str, id: &str) -> Result<(), Error>;
}

/// Trait abstracting versioned-document operations on a parent resource
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    /// Fetch the default version, including its content
    ///
    /// Returns [`Error::NotFound`] when the parent does not exist.
    async fn get_default_document(&self, parent: &str) -> Result<VersionedDocument, Error>;

    /// List every retained version (content may be omitted)
    async fn list_versions(&self, parent: &str) -> Result<Vec<VersionedDocument>, Error>;

    /// Create a new version and make it the default, returning its id
    async fn create_version(&self, parent: &str, content: &str) -> Result<String, Error>;

    /// Delete a non-default version
    ///
    /// Returns [`Error::NotFound`] when the version no longer exists.
    async fn delete_version(&self, parent: &str, version_id: &str) -> Result<(), Error>;
}
