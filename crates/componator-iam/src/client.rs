//! IAM API boundary
//!
//! [`IamClient`] is the narrow slice of the IAM API the handlers use. Real
//! deployments wrap an SDK client; tests use the generated mock or
//! [`crate::InMemoryIam`]. Implementations report a missing entity on
//! mutating calls as [`Error::NotFound`] and on lookups as `Ok(None)`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use componator_common::Error;
use componator_convergence::VersionedDocument;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// An IAM role as reported by the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    /// Role ARN
    pub arn: String,
    /// Provider-assigned id
    pub role_id: String,
    /// Role name
    pub role_name: String,
    /// IAM path
    pub path: String,
    /// Current trust policy document
    pub assume_role_policy_document: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Maximum session duration in seconds
    pub max_session_duration: i32,
    /// Tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// A managed IAM policy as reported by the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Policy ARN
    pub arn: String,
    /// Provider-assigned id
    pub policy_id: String,
    /// Policy name
    pub policy_name: String,
    /// IAM path
    pub path: String,
    /// Id of the default version
    pub default_version_id: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Input for [`IamClient::create_role`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateRoleRequest {
    /// Role name
    pub role_name: String,
    /// Trust policy document
    pub assume_role_policy_document: String,
    /// IAM path
    pub path: String,
    /// Description
    pub description: String,
    /// Maximum session duration in seconds
    pub max_session_duration: i32,
    /// Tags
    pub tags: BTreeMap<String, String>,
}

/// Input for [`IamClient::create_policy`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreatePolicyRequest {
    /// Policy name
    pub policy_name: String,
    /// Initial policy document, becomes version v1
    pub policy_document: String,
    /// IAM path
    pub path: String,
    /// Description
    pub description: String,
    /// Tags
    pub tags: BTreeMap<String, String>,
}

/// Trait abstracting IAM API operations
///
/// This trait allows mocking IAM in tests while using a real SDK client in
/// production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IamClient: Send + Sync {
    /// Look up a role by name
    async fn get_role(&self, role_name: &str) -> Result<Option<Role>, Error>;

    /// Create a role
    async fn create_role(&self, request: &CreateRoleRequest) -> Result<Role, Error>;

    /// Replace a role's trust policy
    async fn update_assume_role_policy(&self, role_name: &str, document: &str)
        -> Result<(), Error>;

    /// Delete a role that has no attached policies
    async fn delete_role(&self, role_name: &str) -> Result<(), Error>;

    /// List ARNs of the managed policies attached to a role
    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<String>, Error>;

    /// Attach a managed policy to a role
    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), Error>;

    /// Detach a managed policy from a role
    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), Error>;

    /// Find a customer-managed policy by name under a path
    async fn find_policy(&self, policy_name: &str, path: &str) -> Result<Option<Policy>, Error>;

    /// Look up a policy by ARN
    async fn get_policy(&self, policy_arn: &str) -> Result<Option<Policy>, Error>;

    /// Create a managed policy
    async fn create_policy(&self, request: &CreatePolicyRequest) -> Result<Policy, Error>;

    /// Delete a policy that has only its default version left
    async fn delete_policy(&self, policy_arn: &str) -> Result<(), Error>;

    /// Fetch one version of a policy, including its document
    async fn get_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> Result<VersionedDocument, Error>;

    /// List every retained version of a policy (metadata only)
    async fn list_policy_versions(&self, policy_arn: &str)
        -> Result<Vec<VersionedDocument>, Error>;

    /// Create a new policy version
    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> Result<VersionedDocument, Error>;

    /// Delete a non-default policy version
    async fn delete_policy_version(&self, policy_arn: &str, version_id: &str)
        -> Result<(), Error>;
}
