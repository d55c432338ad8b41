//! Managed IAM policy handler
//!
//! Apply creates the policy when no policy with the configured name exists
//! under the configured path. Otherwise the default version is converged to
//! the configured document through [`DocumentVersionManager`], which evicts
//! the oldest non-default versions until a new one fits under the bound.

use std::sync::Arc;

use componator_common::{DefaultClassifier, Error, ErrorClassifier, Result};
use componator_convergence::{cancellable, ConvergenceReport, DocumentVersionManager};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::adapters::PolicyDocuments;
use crate::client::{CreatePolicyRequest, IamClient, Policy};
use crate::config::{ConvergenceSettings, IamPolicyConfig, IamPolicyStatus};

/// Builds [`IamPolicyOperations`] from raw configuration and status
#[derive(Clone)]
pub struct IamPolicyOperationsFactory {
    client: Arc<dyn IamClient>,
    classifier: Arc<dyn ErrorClassifier>,
    versions: DocumentVersionManager,
}

impl IamPolicyOperationsFactory {
    /// Create a factory with default settings and [`DefaultClassifier`]
    pub fn new(client: Arc<dyn IamClient>) -> Self {
        let versions = DocumentVersionManager::new(Arc::new(PolicyDocuments::new(client.clone())));
        Self {
            client,
            classifier: Arc::new(DefaultClassifier),
            versions,
        }
    }

    /// Apply convergence settings
    pub fn with_settings(mut self, settings: &ConvergenceSettings) -> Result<Self> {
        settings.validate()?;
        self.versions = DocumentVersionManager::with_max_versions(
            Arc::new(PolicyDocuments::new(self.client.clone())),
            settings.max_policy_versions,
        )?;
        Ok(self)
    }

    /// Replace the error classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Resolve configuration and status for one reconcile
    ///
    /// Parse and validation failures are permanent.
    pub fn new_operations(
        &self,
        raw_config: &Value,
        raw_status: Option<&Value>,
    ) -> Result<IamPolicyOperations> {
        Ok(IamPolicyOperations {
            client: self.client.clone(),
            classifier: self.classifier.clone(),
            versions: self.versions.clone(),
            config: IamPolicyConfig::resolve(raw_config)?,
            status: IamPolicyStatus::resolve(raw_status)?,
        })
    }
}

/// Handler steps for one managed IAM policy
pub struct IamPolicyOperations {
    client: Arc<dyn IamClient>,
    classifier: Arc<dyn ErrorClassifier>,
    versions: DocumentVersionManager,
    config: IamPolicyConfig,
    status: IamPolicyStatus,
}

impl IamPolicyOperations {
    /// Resolved configuration
    pub fn config(&self) -> &IamPolicyConfig {
        &self.config
    }

    /// Status as loaded at the start of this reconcile
    pub fn status(&self) -> &IamPolicyStatus {
        &self.status
    }

    /// Create the policy, or converge its default version to the configured document
    #[instrument(skip(self, cancel), fields(policy = %self.config.policy_name))]
    pub async fn apply(&self, cancel: &CancellationToken) -> ConvergenceReport<IamPolicyStatus> {
        let policy_name = self.config.policy_name.as_str();
        let mut status = self.status.clone();

        info!("Starting IAM policy deployment");

        let found = cancellable(cancel, policy_name, || {
            self.client.find_policy(policy_name, &self.config.path)
        })
        .await;
        let existing = match found {
            Ok(existing) => existing,
            Err(e) => return self.fail(status, e),
        };

        let Some(policy) = existing else {
            return self.create(status, cancel).await;
        };

        record_identity(&mut status, &policy);
        info!(policy_arn = %status.policy_arn, "Policy already exists, updating via versioning");

        let outcome = self
            .versions
            .reconcile(&status.policy_arn, &self.config.policy_document, cancel)
            .await;
        if let Some(version_id) = &outcome.version_id {
            status.current_version_id = version_id.clone();
        }

        let details = if !outcome.changed {
            format!(
                "Policy {} unchanged at version {}",
                status.policy_name, status.current_version_id
            )
        } else {
            let updated = format!(
                "Updated policy {} to version {}",
                status.policy_name, status.current_version_id
            );
            match outcome.evicted_version_ids.as_slice() {
                [] => updated,
                [evicted] => format!("{updated}, deleted version {evicted}"),
                evicted => format!("{updated}, deleted versions {}", evicted.join(", ")),
            }
        };

        ConvergenceReport::settle(status, outcome.error, details, self.classifier.as_ref())
    }

    async fn create(
        &self,
        mut status: IamPolicyStatus,
        cancel: &CancellationToken,
    ) -> ConvergenceReport<IamPolicyStatus> {
        let policy_name = self.config.policy_name.as_str();
        info!("Creating new IAM policy");

        let request = CreatePolicyRequest {
            policy_name: policy_name.to_string(),
            policy_document: self.config.policy_document.clone(),
            path: self.config.path.clone(),
            description: self.config.description.clone(),
            tags: self.config.tags.clone(),
        };
        let created =
            cancellable(cancel, policy_name, || self.client.create_policy(&request)).await;
        match created {
            Ok(policy) => {
                record_identity(&mut status, &policy);
                info!(
                    policy_arn = %status.policy_arn,
                    version = %status.current_version_id,
                    "Created IAM policy"
                );
                let details = format!(
                    "Created policy {} at version {}",
                    status.policy_name, status.current_version_id
                );
                ConvergenceReport::success(status, details)
            }
            Err(e) => self.fail(status, e),
        }
    }

    /// Verify the applied policy still exists and refresh its identity
    #[instrument(skip(self, cancel), fields(policy = %self.config.policy_name))]
    pub async fn check_applied(
        &self,
        cancel: &CancellationToken,
    ) -> ConvergenceReport<IamPolicyStatus> {
        let mut status = self.status.clone();

        if status.policy_arn.is_empty() {
            debug!("No policy ARN in status, deployment not started");
            return ConvergenceReport::in_progress(status, "Policy deployment not started");
        }

        match self.get_policy(cancel).await {
            Ok(Some(policy)) => {
                record_identity(&mut status, &policy);
                info!(
                    policy_arn = %status.policy_arn,
                    policy_id = %status.policy_id,
                    "Policy deployment complete"
                );
                let details = format!(
                    "Policy {} ready at version {}",
                    status.policy_name, status.current_version_id
                );
                ConvergenceReport::success(status, details)
            }
            Ok(None) => {
                let err = Error::not_found(
                    status.policy_arn.as_str(),
                    format!("policy not found at ARN {}", status.policy_arn),
                );
                ConvergenceReport::permanent(status, err)
            }
            Err(e) => self.fail(status, e),
        }
    }

    /// Delete every non-default version, then the policy
    #[instrument(skip(self, cancel), fields(policy = %self.config.policy_name))]
    pub async fn delete(&self, cancel: &CancellationToken) -> ConvergenceReport<IamPolicyStatus> {
        let status = self.status.clone();
        let arn = self.status.policy_arn.as_str();

        if arn.is_empty() {
            info!("No policy ARN in status, nothing to delete");
            return ConvergenceReport::success(status, "No policy to delete");
        }

        info!(policy_arn = %arn, "Starting IAM policy deletion");

        match self.get_policy(cancel).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(policy_arn = %arn, "Policy already deleted");
                let details = format!("Policy {} already deleted", status.policy_name);
                return ConvergenceReport::success(status, details);
            }
            Err(e) => return self.fail(status, e),
        }

        if let Err(e) = self.delete_non_default_versions(arn, cancel).await {
            return self.fail(status, e);
        }

        let deleted = cancellable(cancel, arn, || self.client.delete_policy(arn)).await;
        match deleted {
            Ok(()) => info!(policy_arn = %arn, "Deleted IAM policy"),
            Err(e) if e.is_not_found() => {
                info!(policy_arn = %arn, "Policy not found during deletion, already deleted")
            }
            Err(e) => return self.fail(status, e),
        }

        let details = format!("Deleting policy {}", status.policy_name);
        ConvergenceReport::success(status, details)
    }

    /// Report whether the policy is gone
    #[instrument(skip(self, cancel), fields(policy = %self.config.policy_name))]
    pub async fn check_deleted(
        &self,
        cancel: &CancellationToken,
    ) -> ConvergenceReport<IamPolicyStatus> {
        let status = self.status.clone();

        if status.policy_arn.is_empty() {
            debug!("No policy ARN in status, deletion complete");
            return ConvergenceReport::success(status, "No policy to delete");
        }

        match self.get_policy(cancel).await {
            Ok(None) => {
                info!(policy_arn = %status.policy_arn, "Policy deletion verified");
                let details = format!("Policy {} deleted", status.policy_name);
                ConvergenceReport::success(status, details)
            }
            Ok(Some(_)) => {
                debug!(
                    policy_arn = %status.policy_arn,
                    "Policy still exists, deletion in progress"
                );
                let details = format!("Waiting for policy {} deletion", status.policy_name);
                ConvergenceReport::in_progress(status, details)
            }
            Err(e) => self.fail(status, e),
        }
    }

    async fn delete_non_default_versions(
        &self,
        arn: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let listed = cancellable(cancel, arn, || self.client.list_policy_versions(arn)).await;
        let versions = match listed {
            Ok(versions) => versions,
            Err(e) if e.is_not_found() => {
                debug!(
                    policy_arn = %arn,
                    "Policy not found when listing versions, already deleted"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut deleted = 0;
        for version in versions.iter().filter(|v| !v.is_default) {
            let result = cancellable(cancel, arn, || {
                self.client.delete_policy_version(arn, &version.version_id)
            })
            .await;
            match result {
                Ok(()) => {
                    deleted += 1;
                    debug!(version = %version.version_id, "Deleted policy version");
                }
                Err(e) if e.is_not_found() => {
                    debug!(version = %version.version_id, "Version already deleted");
                }
                Err(e) => return Err(e),
            }
        }

        if deleted > 0 {
            info!(policy_arn = %arn, count = deleted, "Deleted non-default policy versions");
        }
        Ok(())
    }

    async fn get_policy(&self, cancel: &CancellationToken) -> Result<Option<Policy>> {
        let arn = self.status.policy_arn.as_str();
        cancellable(cancel, arn, || self.client.get_policy(arn)).await
    }

    fn fail(&self, status: IamPolicyStatus, error: Error) -> ConvergenceReport<IamPolicyStatus> {
        ConvergenceReport::for_error(status, error, self.classifier.as_ref())
    }
}

fn record_identity(status: &mut IamPolicyStatus, policy: &Policy) {
    status.policy_arn = policy.arn.clone();
    status.policy_id = policy.policy_id.clone();
    status.policy_name = policy.policy_name.clone();
    status.current_version_id = policy.default_version_id.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockIamClient;
    use chrono::{TimeZone, Utc};
    use componator_convergence::{ReportPhase, VersionedDocument};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    const ARN: &str = "arn:aws:iam::123456789012:policy/app-policy";
    const OLD_DOC: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"s3:GetObject","Resource":"*"}]}"#;
    const NEW_DOC: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"s3:*","Resource":"*"}]}"#;

    fn config(document: &str) -> Value {
        json!({"policyName": "app-policy", "policyDocument": document})
    }

    fn applied_status() -> Value {
        json!({
            "policyArn": ARN,
            "policyId": "ANPA0001",
            "policyName": "app-policy",
            "currentVersionId": "v5",
        })
    }

    fn policy(default_version_id: &str) -> Policy {
        Policy {
            arn: ARN.to_string(),
            policy_id: "ANPA0001".to_string(),
            policy_name: "app-policy".to_string(),
            path: "/".to_string(),
            default_version_id: default_version_id.to_string(),
            description: String::new(),
            tags: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    fn version(n: u32, content: Option<&str>) -> VersionedDocument {
        VersionedDocument {
            version_id: format!("v{n}"),
            content: content.map(str::to_string),
            is_default: n == 5,
            created_at: Utc.with_ymd_and_hms(2025, 1, n, 0, 0, 0).unwrap(),
        }
    }

    fn operations(
        mock: MockIamClient,
        config: Value,
        status: Option<Value>,
    ) -> IamPolicyOperations {
        IamPolicyOperationsFactory::new(Arc::new(mock))
            .new_operations(&config, status.as_ref())
            .unwrap()
    }

    /// Existing policy at v5 whose default document is OLD_DOC
    fn existing_policy(mock: &mut MockIamClient) {
        mock.expect_find_policy()
            .returning(|_, _| Ok(Some(policy("v5"))));
        mock.expect_get_policy()
            .returning(|_| Ok(Some(policy("v5"))));
        mock.expect_get_policy_version()
            .returning(|_, _| Ok(version(5, Some(OLD_DOC))));
    }

    // =========================================================================
    // Story Tests: Apply
    // =========================================================================

    /// Story: A missing policy is created with the configured document
    #[tokio::test]
    async fn story_missing_policy_is_created() {
        let mut mock = MockIamClient::new();
        mock.expect_find_policy().returning(|name, path| {
            assert_eq!(name, "app-policy");
            assert_eq!(path, "/");
            Ok(None)
        });
        mock.expect_create_policy().times(1).returning(|request| {
            assert_eq!(request.policy_document, NEW_DOC);
            Ok(policy("v1"))
        });
        mock.expect_create_policy_version().never();

        let report = operations(mock, config(NEW_DOC), None)
            .apply(&CancellationToken::new())
            .await;

        assert!(report.is_converged());
        assert_eq!(report.status.policy_arn, ARN);
        assert_eq!(report.status.current_version_id, "v1");
        assert_eq!(
            report.details.as_deref(),
            Some("Created policy app-policy at version v1")
        );
    }

    /// Story: A changed document at full history evicts v1 and creates v6
    #[tokio::test]
    async fn story_full_history_rotates_versions() {
        let calls = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut mock = MockIamClient::new();
        existing_policy(&mut mock);
        mock.expect_list_policy_versions()
            .returning(|_| Ok((1..=5).map(|n| version(n, None)).collect()));
        let delete = calls.clone();
        mock.expect_delete_policy_version().returning(move |_, id| {
            delete.lock().unwrap().push(format!("delete {id}"));
            Ok(())
        });
        let create = calls.clone();
        mock.expect_create_policy_version()
            .returning(move |arn, document, set_as_default| {
                assert_eq!(arn, ARN);
                assert_eq!(document, NEW_DOC);
                assert!(set_as_default);
                create.lock().unwrap().push("create".to_string());
                Ok(version(6, None))
            });

        let report = operations(mock, config(NEW_DOC), Some(applied_status()))
            .apply(&CancellationToken::new())
            .await;

        assert!(report.is_converged());
        assert_eq!(report.status.current_version_id, "v6");
        assert_eq!(*calls.lock().unwrap(), vec!["delete v1", "create"]);
        assert_eq!(
            report.details.as_deref(),
            Some("Updated policy app-policy to version v6, deleted version v1")
        );
    }

    #[tokio::test]
    async fn unchanged_document_creates_nothing() {
        let mut mock = MockIamClient::new();
        existing_policy(&mut mock);
        mock.expect_list_policy_versions().never();
        mock.expect_create_policy_version().never();

        let reordered = r#"{"Statement":[{"Resource":"*","Action":"s3:GetObject","Effect":"Allow"}],"Version":"2012-10-17"}"#;
        let report = operations(mock, config(reordered), Some(applied_status()))
            .apply(&CancellationToken::new())
            .await;

        assert!(report.is_converged());
        assert_eq!(report.status.current_version_id, "v5");
        assert_eq!(
            report.details.as_deref(),
            Some("Policy app-policy unchanged at version v5")
        );
    }

    #[tokio::test]
    async fn custom_history_bound_is_honored() {
        let mut mock = MockIamClient::new();
        existing_policy(&mut mock);
        mock.expect_list_policy_versions()
            .returning(|_| Ok(vec![version(4, None), version(5, None)]));
        mock.expect_delete_policy_version()
            .times(1)
            .returning(|_, id| {
                assert_eq!(id, "v4");
                Ok(())
            });
        mock.expect_create_policy_version()
            .returning(|_, _, _| Ok(version(6, None)));

        let settings = ConvergenceSettings {
            max_policy_versions: 2,
        };
        let ops = IamPolicyOperationsFactory::new(Arc::new(mock))
            .with_settings(&settings)
            .unwrap()
            .new_operations(&config(NEW_DOC), Some(&applied_status()))
            .unwrap();
        let report = ops.apply(&CancellationToken::new()).await;

        assert!(report.is_converged());
        assert_eq!(report.status.current_version_id, "v6");
    }

    #[test]
    fn unsatisfiable_history_bounds_are_rejected() {
        for max_policy_versions in [0, 1] {
            let settings = ConvergenceSettings {
                max_policy_versions,
            };
            let result = IamPolicyOperationsFactory::new(Arc::new(MockIamClient::new()))
                .with_settings(&settings);
            assert!(result.is_err());
        }
    }

    /// Story: A rejected new version leaves the old default in status
    #[tokio::test]
    async fn story_create_version_failure_keeps_old_default() {
        let mut mock = MockIamClient::new();
        existing_policy(&mut mock);
        mock.expect_list_policy_versions()
            .returning(|_| Ok(vec![version(5, None)]));
        mock.expect_create_policy_version().returning(|arn, _, _| {
            Err(Error::provider_permanent(
                arn,
                "CreatePolicyVersion",
                "MalformedPolicyDocument",
            ))
        });

        let report = operations(mock, config(NEW_DOC), Some(applied_status()))
            .apply(&CancellationToken::new())
            .await;

        assert_eq!(report.phase, ReportPhase::PermanentFailure);
        assert_eq!(report.status.current_version_id, "v5");
    }

    #[tokio::test]
    async fn create_policy_failure_is_classified() {
        let mut mock = MockIamClient::new();
        mock.expect_find_policy().returning(|_, _| Ok(None));
        mock.expect_create_policy()
            .returning(|request| {
                Err(Error::provider(&request.policy_name, "CreatePolicy", "Throttling"))
            });

        let report = operations(mock, config(NEW_DOC), None)
            .apply(&CancellationToken::new())
            .await;

        assert_eq!(report.phase, ReportPhase::RetryableFailure);
        assert!(report.status.policy_arn.is_empty());
    }

    // =========================================================================
    // Check applied
    // =========================================================================

    #[tokio::test]
    async fn check_applied_waits_for_arn() {
        let mut mock = MockIamClient::new();
        mock.expect_get_policy().never();

        let report = operations(mock, config(NEW_DOC), None)
            .check_applied(&CancellationToken::new())
            .await;
        assert_eq!(report.phase, ReportPhase::InProgress);
    }

    #[tokio::test]
    async fn check_applied_missing_policy_is_permanent() {
        let mut mock = MockIamClient::new();
        mock.expect_get_policy().returning(|_| Ok(None));

        let report = operations(mock, config(NEW_DOC), Some(applied_status()))
            .check_applied(&CancellationToken::new())
            .await;

        assert_eq!(report.phase, ReportPhase::PermanentFailure);
        assert!(report.details.unwrap().contains(ARN));
    }

    #[tokio::test]
    async fn check_applied_refreshes_default_version() {
        let mut mock = MockIamClient::new();
        mock.expect_get_policy()
            .returning(|_| Ok(Some(policy("v7"))));

        let report = operations(mock, config(NEW_DOC), Some(applied_status()))
            .check_applied(&CancellationToken::new())
            .await;

        assert!(report.is_converged());
        assert_eq!(report.status.current_version_id, "v7");
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Story: Delete clears non-default versions before the policy
    #[tokio::test]
    async fn story_delete_removes_versions_then_policy() {
        let calls = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut mock = MockIamClient::new();
        mock.expect_get_policy()
            .returning(|_| Ok(Some(policy("v5"))));
        mock.expect_list_policy_versions()
            .returning(|_| Ok(vec![version(3, None), version(4, None), version(5, None)]));
        let delete_version = calls.clone();
        mock.expect_delete_policy_version().returning(move |_, id| {
            delete_version.lock().unwrap().push(format!("delete {id}"));
            if id == "v4" {
                return Err(Error::not_found(id, "NoSuchEntity"));
            }
            Ok(())
        });
        let delete_policy = calls.clone();
        mock.expect_delete_policy().times(1).returning(move |arn| {
            assert_eq!(arn, ARN);
            delete_policy.lock().unwrap().push("delete policy".to_string());
            Ok(())
        });

        let report = operations(mock, config(NEW_DOC), Some(applied_status()))
            .delete(&CancellationToken::new())
            .await;

        assert!(report.is_converged());
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["delete v3", "delete v4", "delete policy"]
        );
    }

    #[tokio::test]
    async fn delete_without_arn_is_a_no_op() {
        let mut mock = MockIamClient::new();
        mock.expect_get_policy().never();
        mock.expect_delete_policy().never();

        let report = operations(mock, config(NEW_DOC), None)
            .delete(&CancellationToken::new())
            .await;
        assert!(report.is_converged());
    }

    #[tokio::test]
    async fn delete_of_missing_policy_succeeds() {
        let mut mock = MockIamClient::new();
        mock.expect_get_policy().returning(|_| Ok(None));
        mock.expect_list_policy_versions().never();
        mock.expect_delete_policy().never();

        let report = operations(mock, config(NEW_DOC), Some(applied_status()))
            .delete(&CancellationToken::new())
            .await;
        assert!(report.is_converged());
    }

    #[tokio::test]
    async fn version_delete_failure_blocks_policy_delete() {
        let mut mock = MockIamClient::new();
        mock.expect_get_policy()
            .returning(|_| Ok(Some(policy("v5"))));
        mock.expect_list_policy_versions()
            .returning(|_| Ok(vec![version(4, None), version(5, None)]));
        mock.expect_delete_policy_version()
            .returning(|arn, _| Err(Error::provider(arn, "DeletePolicyVersion", "Throttling")));
        mock.expect_delete_policy().never();

        let report = operations(mock, config(NEW_DOC), Some(applied_status()))
            .delete(&CancellationToken::new())
            .await;
        assert_eq!(report.phase, ReportPhase::RetryableFailure);
    }

    #[tokio::test]
    async fn check_deleted_reports_progress() {
        let mut mock = MockIamClient::new();
        mock.expect_get_policy()
            .returning(|_| Ok(Some(policy("v5"))));

        let report = operations(mock, config(NEW_DOC), Some(applied_status()))
            .check_deleted(&CancellationToken::new())
            .await;
        assert_eq!(report.phase, ReportPhase::InProgress);
        assert_eq!(
            report.details.as_deref(),
            Some("Waiting for policy app-policy deletion")
        );

        let mut mock = MockIamClient::new();
        mock.expect_get_policy().returning(|_| Ok(None));
        let report = operations(mock, config(NEW_DOC), Some(applied_status()))
            .check_deleted(&CancellationToken::new())
            .await;
        assert!(report.is_converged());
    }
}
