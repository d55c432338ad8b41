//! In-process IAM for tests and local runs
//!
//! Mirrors the IAM behaviors the handlers depend on: the per-policy version
//! quota, delete conflicts for attached roles and non-default versions,
//! and `NoSuchEntity` on missing targets. Failures can be queued per
//! operation to exercise partial-progress paths.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use componator_common::document::parse_document;
use componator_common::{Error, DEFAULT_MAX_POLICY_VERSIONS};
use componator_convergence::VersionedDocument;
use parking_lot::Mutex;
use tracing::trace;

use crate::client::{CreatePolicyRequest, CreateRoleRequest, IamClient, Policy, Role};

/// Account id used in ARNs unless overridden
pub const DEFAULT_ACCOUNT_ID: &str = "123456789012";

// Base of the logical clock, 2024-01-01T00:00:00Z
const CLOCK_BASE_SECS: i64 = 1_704_067_200;

struct StoredRole {
    role: Role,
    attached: BTreeSet<String>,
}

struct StoredPolicy {
    policy: Policy,
    versions: Vec<VersionedDocument>,
    next_version: u32,
}

#[derive(Default)]
struct State {
    tick: i64,
    next_id: u64,
    roles: BTreeMap<String, StoredRole>,
    policies: BTreeMap<String, StoredPolicy>,
    failures: BTreeMap<String, VecDeque<Error>>,
    calls: Vec<String>,
}

impl State {
    /// Record a call and hand back any failure queued for it
    fn enter(&mut self, operation: &str) -> Result<(), Error> {
        trace!(operation, "IAM call");
        self.calls.push(operation.to_string());
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn now(&mut self) -> DateTime<Utc> {
        self.tick += 1;
        DateTime::<Utc>::default() + Duration::seconds(CLOCK_BASE_SECS + self.tick)
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:016X}", self.next_id)
    }

    fn role(&mut self, role_name: &str) -> Result<&mut StoredRole, Error> {
        self.roles.get_mut(role_name).ok_or_else(|| {
            Error::not_found(
                role_name,
                format!("NoSuchEntity: The role with name {role_name} cannot be found."),
            )
        })
    }

    fn policy(&mut self, policy_arn: &str) -> Result<&mut StoredPolicy, Error> {
        self.policies.get_mut(policy_arn).ok_or_else(|| {
            Error::not_found(
                policy_arn,
                format!("NoSuchEntity: Policy {policy_arn} does not exist or is not attachable."),
            )
        })
    }
}

fn check_document(resource: &str, operation: &str, document: &str) -> Result<(), Error> {
    if parse_document(document).is_none() {
        return Err(Error::provider_permanent(
            resource,
            operation,
            "MalformedPolicyDocument: Syntax errors in policy.",
        ));
    }
    Ok(())
}

/// [`IamClient`] backed by process memory
pub struct InMemoryIam {
    account_id: String,
    version_limit: usize,
    state: Mutex<State>,
}

impl Default for InMemoryIam {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIam {
    /// Empty account with the standard policy version quota
    pub fn new() -> Self {
        Self {
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
            version_limit: DEFAULT_MAX_POLICY_VERSIONS,
            state: Mutex::new(State::default()),
        }
    }

    /// Override the per-policy version quota
    pub fn with_version_limit(mut self, limit: usize) -> Self {
        self.version_limit = limit;
        self
    }

    /// Fail the next call of `operation` (e.g. "AttachRolePolicy") with `error`
    ///
    /// Queued failures are consumed one per call, in order.
    pub fn fail_next(&self, operation: &str, error: Error) {
        self.state
            .lock()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Operation names called so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// ARN a customer-managed policy gets in this account
    pub fn policy_arn(&self, path: &str, policy_name: &str) -> String {
        format!("arn:aws:iam::{}:policy{path}{policy_name}", self.account_id)
    }

    /// Snapshot of a role
    pub fn role(&self, role_name: &str) -> Option<Role> {
        self.state.lock().roles.get(role_name).map(|r| r.role.clone())
    }

    /// Snapshot of a policy
    pub fn policy(&self, policy_arn: &str) -> Option<Policy> {
        self.state
            .lock()
            .policies
            .get(policy_arn)
            .map(|p| p.policy.clone())
    }

    /// Policies attached to a role, sorted
    pub fn attached_policies(&self, role_name: &str) -> Vec<String> {
        self.state
            .lock()
            .roles
            .get(role_name)
            .map(|r| r.attached.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every retained version of a policy, with documents
    pub fn policy_versions(&self, policy_arn: &str) -> Vec<VersionedDocument> {
        self.state
            .lock()
            .policies
            .get(policy_arn)
            .map(|p| p.versions.clone())
            .unwrap_or_default()
    }

    fn is_local_policy(&self, policy_arn: &str) -> bool {
        policy_arn.starts_with(&format!("arn:aws:iam::{}:policy/", self.account_id))
    }
}

#[async_trait]
impl IamClient for InMemoryIam {
    async fn get_role(&self, role_name: &str) -> Result<Option<Role>, Error> {
        let mut state = self.state.lock();
        state.enter("GetRole")?;
        Ok(state.roles.get(role_name).map(|r| r.role.clone()))
    }

    async fn create_role(&self, request: &CreateRoleRequest) -> Result<Role, Error> {
        let mut state = self.state.lock();
        state.enter("CreateRole")?;
        let name = request.role_name.as_str();
        if state.roles.contains_key(name) {
            return Err(Error::provider_permanent(
                name,
                "CreateRole",
                format!("EntityAlreadyExists: Role with name {name} already exists."),
            ));
        }
        check_document(name, "CreateRole", &request.assume_role_policy_document)?;

        let role = Role {
            arn: format!("arn:aws:iam::{}:role{}{name}", self.account_id, request.path),
            role_id: state.next_id("AROA"),
            role_name: name.to_string(),
            path: request.path.clone(),
            assume_role_policy_document: request.assume_role_policy_document.clone(),
            description: request.description.clone(),
            max_session_duration: request.max_session_duration,
            tags: request.tags.clone(),
            created_at: state.now(),
        };
        state.roles.insert(
            name.to_string(),
            StoredRole {
                role: role.clone(),
                attached: BTreeSet::new(),
            },
        );
        Ok(role)
    }

    async fn update_assume_role_policy(
        &self,
        role_name: &str,
        document: &str,
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.enter("UpdateAssumeRolePolicy")?;
        check_document(role_name, "UpdateAssumeRolePolicy", document)?;
        state.role(role_name)?.role.assume_role_policy_document = document.to_string();
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.enter("DeleteRole")?;
        if !state.role(role_name)?.attached.is_empty() {
            return Err(Error::provider_permanent(
                role_name,
                "DeleteRole",
                "DeleteConflict: Cannot delete entity, must detach all policies first.",
            ));
        }
        state.roles.remove(role_name);
        Ok(())
    }

    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<String>, Error> {
        let mut state = self.state.lock();
        state.enter("ListAttachedRolePolicies")?;
        Ok(state.role(role_name)?.attached.iter().cloned().collect())
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.enter("AttachRolePolicy")?;
        if self.is_local_policy(policy_arn) {
            state.policy(policy_arn)?;
        }
        state.role(role_name)?.attached.insert(policy_arn.to_string());
        Ok(())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.enter("DetachRolePolicy")?;
        if !state.role(role_name)?.attached.remove(policy_arn) {
            return Err(Error::not_found(
                policy_arn,
                format!("NoSuchEntity: Policy {policy_arn} was not found."),
            ));
        }
        Ok(())
    }

    async fn find_policy(&self, policy_name: &str, path: &str) -> Result<Option<Policy>, Error> {
        let mut state = self.state.lock();
        state.enter("ListPolicies")?;
        Ok(state
            .policies
            .values()
            .find(|p| p.policy.policy_name == policy_name && p.policy.path == path)
            .map(|p| p.policy.clone()))
    }

    async fn get_policy(&self, policy_arn: &str) -> Result<Option<Policy>, Error> {
        let mut state = self.state.lock();
        state.enter("GetPolicy")?;
        Ok(state.policies.get(policy_arn).map(|p| p.policy.clone()))
    }

    async fn create_policy(&self, request: &CreatePolicyRequest) -> Result<Policy, Error> {
        let mut state = self.state.lock();
        state.enter("CreatePolicy")?;
        let arn = self.policy_arn(&request.path, &request.policy_name);
        if state.policies.contains_key(&arn) {
            return Err(Error::provider_permanent(
                &arn,
                "CreatePolicy",
                format!(
                    "EntityAlreadyExists: A policy called {} already exists.",
                    request.policy_name
                ),
            ));
        }
        check_document(&arn, "CreatePolicy", &request.policy_document)?;

        let created_at = state.now();
        let policy = Policy {
            arn: arn.clone(),
            policy_id: state.next_id("ANPA"),
            policy_name: request.policy_name.clone(),
            path: request.path.clone(),
            default_version_id: "v1".to_string(),
            description: request.description.clone(),
            tags: request.tags.clone(),
            created_at,
        };
        let first = VersionedDocument {
            version_id: "v1".to_string(),
            content: Some(request.policy_document.clone()),
            is_default: true,
            created_at,
        };
        state.policies.insert(
            arn,
            StoredPolicy {
                policy: policy.clone(),
                versions: vec![first],
                next_version: 2,
            },
        );
        Ok(policy)
    }

    async fn delete_policy(&self, policy_arn: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.enter("DeletePolicy")?;
        if state.policy(policy_arn)?.versions.len() > 1 {
            return Err(Error::provider_permanent(
                policy_arn,
                "DeletePolicy",
                "DeleteConflict: This policy has more than one version. \
                 Before you delete a policy, you must delete the policy's versions.",
            ));
        }
        if state.roles.values().any(|r| r.attached.contains(policy_arn)) {
            return Err(Error::provider_permanent(
                policy_arn,
                "DeletePolicy",
                "DeleteConflict: Cannot delete a policy attached to entities.",
            ));
        }
        state.policies.remove(policy_arn);
        Ok(())
    }

    async fn get_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> Result<VersionedDocument, Error> {
        let mut state = self.state.lock();
        state.enter("GetPolicyVersion")?;
        state
            .policy(policy_arn)?
            .versions
            .iter()
            .find(|v| v.version_id == version_id)
            .cloned()
            .ok_or_else(|| {
                Error::not_found(
                    policy_arn,
                    format!("NoSuchEntity: Policy version {version_id} does not exist."),
                )
            })
    }

    async fn list_policy_versions(
        &self,
        policy_arn: &str,
    ) -> Result<Vec<VersionedDocument>, Error> {
        let mut state = self.state.lock();
        state.enter("ListPolicyVersions")?;
        Ok(state
            .policy(policy_arn)?
            .versions
            .iter()
            .map(|v| VersionedDocument {
                content: None,
                ..v.clone()
            })
            .collect())
    }

    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> Result<VersionedDocument, Error> {
        let mut state = self.state.lock();
        state.enter("CreatePolicyVersion")?;
        let limit = self.version_limit;
        if state.policy(policy_arn)?.versions.len() >= limit {
            return Err(Error::provider_permanent(
                policy_arn,
                "CreatePolicyVersion",
                format!("LimitExceeded: Cannot exceed quota for PolicyVersionsPerPolicy: {limit}"),
            ));
        }
        check_document(policy_arn, "CreatePolicyVersion", document)?;

        let created_at = state.now();
        let stored = state.policy(policy_arn)?;
        let version = VersionedDocument {
            version_id: format!("v{}", stored.next_version),
            content: Some(document.to_string()),
            is_default: set_as_default,
            created_at,
        };
        stored.next_version += 1;
        if set_as_default {
            for v in &mut stored.versions {
                v.is_default = false;
            }
            stored.policy.default_version_id = version.version_id.clone();
        }
        stored.versions.push(version.clone());
        Ok(version)
    }

    async fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.enter("DeletePolicyVersion")?;
        let stored = state.policy(policy_arn)?;
        let Some(index) = stored.versions.iter().position(|v| v.version_id == version_id) else {
            return Err(Error::not_found(
                policy_arn,
                format!("NoSuchEntity: Policy version {version_id} does not exist."),
            ));
        };
        if stored.versions[index].is_default {
            return Err(Error::provider_permanent(
                policy_arn,
                "DeletePolicyVersion",
                "DeleteConflict: Cannot delete the default version of a policy.",
            ));
        }
        stored.versions.remove(index);
        Ok(())
    }
}
