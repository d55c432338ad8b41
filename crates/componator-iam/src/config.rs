//! Handler configuration and persisted status
//!
//! Configuration arrives as raw JSON from the component definition and status as
//! raw JSON from the previous reconcile. Both are resolved once per
//! reconcile; failures here are permanent because retrying cannot fix them.

use std::collections::BTreeMap;

use componator_common::document::parse_document;
use componator_common::{
    Error, Result, DEFAULT_IAM_PATH, DEFAULT_MAX_POLICY_VERSIONS, DEFAULT_MAX_SESSION_DURATION,
    MIN_POLICY_VERSIONS,
};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Configuration for an IAM role component
///
/// Example:
/// ```json
/// {
///   "roleName": "app-role",
///   "assumeRolePolicy": {"Version": "2012-10-17", "Statement": []},
///   "managedPolicyArns": ["arn:aws:iam::aws:policy/ReadOnlyAccess"]
/// }
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IamRoleConfig {
    /// Name of the role to create or update
    #[serde(default)]
    pub role_name: String,

    /// Trust policy, either a JSON object or a JSON-encoded string
    #[serde(default)]
    pub assume_role_policy: Value,

    /// Optional role description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Maximum session duration in seconds (defaults to 3600)
    #[serde(default)]
    pub max_session_duration: i32,

    /// IAM path (defaults to "/")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Managed policies that must be attached to the role
    #[serde(default)]
    pub managed_policy_arns: Vec<String>,

    /// Tags applied when the role is created
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl IamRoleConfig {
    /// Parse, validate and default a raw role configuration
    pub fn resolve(raw: &Value) -> Result<Self> {
        let mut config: Self = parse("iam-role config", raw)?;
        config.validate()?;
        config.apply_defaults();

        debug!(
            role = %config.role_name,
            path = %config.path,
            max_session_duration = config.max_session_duration,
            policies = config.managed_policy_arns.len(),
            tags = config.tags.len(),
            "Resolved iam-role config"
        );
        Ok(config)
    }

    /// Validate required fields
    pub fn validate(&self) -> Result<()> {
        let resource = self.role_name.as_str();
        if resource.is_empty() {
            return Err(Error::validation_for_field(
                "iam-role",
                "roleName",
                "roleName is required and cannot be empty",
            ));
        }

        match &self.assume_role_policy {
            Value::Null => {
                return Err(Error::validation_for_field(
                    resource,
                    "assumeRolePolicy",
                    "assumeRolePolicy is required and cannot be empty",
                ));
            }
            Value::String(s) if s.trim().is_empty() => {
                return Err(Error::validation_for_field(
                    resource,
                    "assumeRolePolicy",
                    "assumeRolePolicy is required and cannot be empty",
                ));
            }
            Value::String(s) if parse_document(s).is_none() => {
                return Err(Error::validation_for_field(
                    resource,
                    "assumeRolePolicy",
                    "assumeRolePolicy must be valid JSON",
                ));
            }
            _ => {}
        }

        if self.managed_policy_arns.is_empty() {
            return Err(Error::validation_for_field(
                resource,
                "managedPolicyArns",
                "managedPolicyArns is required and must contain at least one policy ARN",
            ));
        }
        if self.managed_policy_arns.iter().any(|arn| arn.trim().is_empty()) {
            return Err(Error::validation_for_field(
                resource,
                "managedPolicyArns",
                "managedPolicyArns cannot contain empty entries",
            ));
        }

        if self.max_session_duration < 0 {
            return Err(Error::validation_for_field(
                resource,
                "maxSessionDuration",
                "maxSessionDuration cannot be negative",
            ));
        }

        Ok(())
    }

    fn apply_defaults(&mut self) {
        if self.path.is_empty() {
            self.path = DEFAULT_IAM_PATH.to_string();
        }
        if self.max_session_duration == 0 {
            self.max_session_duration = DEFAULT_MAX_SESSION_DURATION;
        }
    }

    /// Trust policy as the JSON string sent to the provider
    pub fn trust_policy_document(&self) -> String {
        match &self.assume_role_policy {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Configuration for a managed IAM policy component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IamPolicyConfig {
    /// Name of the policy to create or update
    #[serde(default)]
    pub policy_name: String,

    /// JSON policy document
    #[serde(default)]
    pub policy_document: String,

    /// Optional policy description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// IAM path (defaults to "/")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Tags applied when the policy is created
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl IamPolicyConfig {
    /// Parse, validate and default a raw policy configuration
    pub fn resolve(raw: &Value) -> Result<Self> {
        let mut config: Self = parse("iam-policy config", raw)?;
        config.validate()?;
        if config.path.is_empty() {
            config.path = DEFAULT_IAM_PATH.to_string();
        }

        debug!(
            policy = %config.policy_name,
            path = %config.path,
            has_description = !config.description.is_empty(),
            tags = config.tags.len(),
            "Resolved iam-policy config"
        );
        Ok(config)
    }

    /// Validate required fields
    pub fn validate(&self) -> Result<()> {
        if self.policy_name.is_empty() {
            return Err(Error::validation_for_field(
                "iam-policy",
                "policyName",
                "policyName is required and cannot be empty",
            ));
        }
        if self.policy_document.is_empty() {
            return Err(Error::validation_for_field(
                &self.policy_name,
                "policyDocument",
                "policyDocument is required and cannot be empty",
            ));
        }
        if parse_document(&self.policy_document).is_none() {
            return Err(Error::validation_for_field(
                &self.policy_name,
                "policyDocument",
                "policyDocument must be valid JSON",
            ));
        }
        Ok(())
    }
}

/// Tunables shared by the policy handler
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceSettings {
    /// Provider bound on retained policy versions
    #[serde(default = "default_max_policy_versions")]
    pub max_policy_versions: usize,
}

fn default_max_policy_versions() -> usize {
    DEFAULT_MAX_POLICY_VERSIONS
}

impl Default for ConvergenceSettings {
    fn default() -> Self {
        Self {
            max_policy_versions: DEFAULT_MAX_POLICY_VERSIONS,
        }
    }
}

impl ConvergenceSettings {
    /// Reject a history bound that leaves no room beside the default version
    pub fn validate(&self) -> Result<()> {
        if self.max_policy_versions < MIN_POLICY_VERSIONS {
            return Err(Error::validation_for_field(
                "settings",
                "maxPolicyVersions",
                format!("maxPolicyVersions must be at least {MIN_POLICY_VERSIONS}"),
            ));
        }
        Ok(())
    }
}

/// Persisted status of an IAM role component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IamRoleStatus {
    /// Provider ARN of the role
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role_arn: String,

    /// Provider-assigned role id
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role_id: String,

    /// Role name as created
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role_name: String,

    /// Managed policies actually attached, sorted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attached_policies: Vec<String>,
}

impl IamRoleStatus {
    /// Parse a persisted status; absent or null status starts empty
    pub fn resolve(raw: Option<&Value>) -> Result<Self> {
        resolve_status("iam-role status", raw)
    }
}

/// Persisted status of a managed IAM policy component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IamPolicyStatus {
    /// Provider ARN of the policy
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_arn: String,

    /// Provider-assigned policy id
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_id: String,

    /// Policy name as created
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_name: String,

    /// Id of the default version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_version_id: String,
}

impl IamPolicyStatus {
    /// Parse a persisted status; absent or null status starts empty
    pub fn resolve(raw: Option<&Value>) -> Result<Self> {
        resolve_status("iam-policy status", raw)
    }
}

fn parse<T: DeserializeOwned>(kind: &str, raw: &Value) -> Result<T> {
    T::deserialize(raw)
        .map_err(|e| Error::serialization_for_kind(kind, format!("failed to parse {kind}: {e}")))
}

fn resolve_status<T: DeserializeOwned + Default>(kind: &str, raw: Option<&Value>) -> Result<T> {
    match raw {
        None | Some(Value::Null) => {
            debug!(kind = %kind, "No existing status found, starting with empty status");
            Ok(T::default())
        }
        Some(raw) => parse(kind, raw),
    }
}
