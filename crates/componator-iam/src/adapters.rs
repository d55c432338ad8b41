//! Adapters from [`IamClient`] onto the convergence provider traits

use std::sync::Arc;

use async_trait::async_trait;
use componator_common::Error;
use componator_convergence::{AttachmentProvider, DocumentProvider, VersionedDocument};

use crate::client::IamClient;

/// Managed-policy attachments of a role, keyed by role name
#[derive(Clone)]
pub struct RoleAttachments {
    client: Arc<dyn IamClient>,
}

impl RoleAttachments {
    /// Wrap an IAM client
    pub fn new(client: Arc<dyn IamClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AttachmentProvider for RoleAttachments {
    async fn list_attached(&self, parent: &str) -> Result<Vec<String>, Error> {
        self.client.list_attached_role_policies(parent).await
    }

    async fn attach(&self, parent: &str, id: &str) -> Result<(), Error> {
        self.client.attach_role_policy(parent, id).await
    }

    async fn detach(&self, parent: &str, id: &str) -> Result<(), Error> {
        self.client.detach_role_policy(parent, id).await
    }
}

/// Versions of a managed policy document, keyed by policy ARN
#[derive(Clone)]
pub struct PolicyDocuments {
    client: Arc<dyn IamClient>,
}

impl PolicyDocuments {
    /// Wrap an IAM client
    pub fn new(client: Arc<dyn IamClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentProvider for PolicyDocuments {
    async fn get_default_document(&self, parent: &str) -> Result<VersionedDocument, Error> {
        let policy = self
            .client
            .get_policy(parent)
            .await?
            .ok_or_else(|| Error::not_found(parent, "policy does not exist"))?;
        self.client
            .get_policy_version(parent, &policy.default_version_id)
            .await
    }

    async fn list_versions(&self, parent: &str) -> Result<Vec<VersionedDocument>, Error> {
        self.client.list_policy_versions(parent).await
    }

    async fn create_version(&self, parent: &str, content: &str) -> Result<String, Error> {
        let created = self.client.create_policy_version(parent, content, true).await?;
        Ok(created.version_id)
    }

    async fn delete_version(&self, parent: &str, version_id: &str) -> Result<(), Error> {
        self.client.delete_policy_version(parent, version_id).await
    }
}
