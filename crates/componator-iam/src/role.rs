//! IAM role handler
//!
//! Deploy creates the role when it is missing, keeps its trust policy in
//! sync, and converges its managed-policy attachments. Delete detaches every
//! policy before removing the role, because IAM refuses to delete a role
//! that still has attachments.
//!
//! Status always records the attachments that are actually present, even
//! when a pass stops partway, so the next pass resumes from true state.

use std::sync::Arc;

use componator_common::document::documents_equal;
use componator_common::{DefaultClassifier, Error, ErrorClassifier, Result};
use componator_convergence::{cancellable, AttachmentReconciler, ConvergenceReport};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::adapters::RoleAttachments;
use crate::client::{CreateRoleRequest, IamClient, Role};
use crate::config::{IamRoleConfig, IamRoleStatus};

/// Builds [`IamRoleOperations`] from raw configuration and status
#[derive(Clone)]
pub struct IamRoleOperationsFactory {
    client: Arc<dyn IamClient>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl IamRoleOperationsFactory {
    /// Create a factory that classifies errors with [`DefaultClassifier`]
    pub fn new(client: Arc<dyn IamClient>) -> Self {
        Self::with_classifier(client, Arc::new(DefaultClassifier))
    }

    /// Create a factory with a custom error classifier
    pub fn with_classifier(
        client: Arc<dyn IamClient>,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Self {
        Self { client, classifier }
    }

    /// Resolve configuration and status for one reconcile
    ///
    /// Parse and validation failures are permanent.
    pub fn new_operations(
        &self,
        raw_config: &Value,
        raw_status: Option<&Value>,
    ) -> Result<IamRoleOperations> {
        let config = IamRoleConfig::resolve(raw_config)?;
        let status = IamRoleStatus::resolve(raw_status)?;

        Ok(IamRoleOperations {
            attachments: AttachmentReconciler::new(Arc::new(RoleAttachments::new(
                self.client.clone(),
            ))),
            client: self.client.clone(),
            classifier: self.classifier.clone(),
            config,
            status,
        })
    }
}

/// Handler steps for one IAM role
pub struct IamRoleOperations {
    client: Arc<dyn IamClient>,
    attachments: AttachmentReconciler,
    classifier: Arc<dyn ErrorClassifier>,
    config: IamRoleConfig,
    status: IamRoleStatus,
}

impl IamRoleOperations {
    /// Resolved configuration
    pub fn config(&self) -> &IamRoleConfig {
        &self.config
    }

    /// Status as loaded at the start of this reconcile
    pub fn status(&self) -> &IamRoleStatus {
        &self.status
    }

    /// Create or update the role and converge its policy attachments
    #[instrument(skip(self, cancel), fields(role = %self.config.role_name))]
    pub async fn deploy(&self, cancel: &CancellationToken) -> ConvergenceReport<IamRoleStatus> {
        let role_name = self.config.role_name.as_str();
        let mut status = self.status.clone();

        info!("Starting IAM role deployment");

        let existing = match self.get_role(cancel).await {
            Ok(existing) => existing,
            Err(e) => return self.fail(status, e),
        };

        let desired_trust = self.config.trust_policy_document();
        let created = match existing {
            None => {
                let request = CreateRoleRequest {
                    role_name: role_name.to_string(),
                    assume_role_policy_document: desired_trust,
                    path: self.config.path.clone(),
                    description: self.config.description.clone(),
                    max_session_duration: self.config.max_session_duration,
                    tags: self.config.tags.clone(),
                };
                let created =
                    cancellable(cancel, role_name, || self.client.create_role(&request)).await;
                match created {
                    Ok(role) => {
                        info!(role_arn = %role.arn, "Created IAM role");
                        record_identity(&mut status, &role);
                        // A fresh role has nothing attached, whatever old status says
                        status.attached_policies.clear();
                        true
                    }
                    Err(e) => return self.fail(status, e),
                }
            }
            Some(role) => {
                record_identity(&mut status, &role);
                info!(role_arn = %role.arn, "Role already exists, reconciling configuration");

                if documents_equal(&role.assume_role_policy_document, &desired_trust) {
                    debug!("Trust policy unchanged, skipping update");
                } else {
                    info!("Trust policy changed, updating");
                    let updated = cancellable(cancel, role_name, || {
                        self.client
                            .update_assume_role_policy(role_name, &desired_trust)
                    })
                    .await;
                    if let Err(e) = updated {
                        return self.fail(status, e);
                    }
                }
                false
            }
        };

        let outcome = self
            .attachments
            .reconcile(
                role_name,
                &self.config.managed_policy_arns,
                &status.attached_policies,
                cancel,
            )
            .await;
        status.attached_policies = outcome.attached_list();

        let total = outcome.attached.len();
        let details = if created {
            format!("Created role {} with {} policies", status.role_name, total)
        } else if outcome.changed() {
            format!(
                "Updated role {}: attached {}, detached {}, total {} policies",
                status.role_name, outcome.attached_count, outcome.detached_count, total
            )
        } else {
            format!("Role {} unchanged with {} policies", status.role_name, total)
        };

        ConvergenceReport::settle(status, outcome.error, details, self.classifier.as_ref())
    }

    /// Verify the deployed role still exists and refresh its identity
    #[instrument(skip(self, cancel), fields(role = %self.config.role_name))]
    pub async fn check_deployment(
        &self,
        cancel: &CancellationToken,
    ) -> ConvergenceReport<IamRoleStatus> {
        let mut status = self.status.clone();

        if status.role_arn.is_empty() {
            debug!("No role ARN in status, deployment not started");
            return ConvergenceReport::in_progress(status, "Role deployment not started");
        }

        match self.get_role(cancel).await {
            Ok(Some(role)) => {
                record_identity(&mut status, &role);
                info!(
                    role_arn = %status.role_arn,
                    role_id = %status.role_id,
                    "Role deployment complete"
                );
                let details = format!(
                    "Role {} ready with {} policies",
                    status.role_name,
                    status.attached_policies.len()
                );
                ConvergenceReport::success(status, details)
            }
            Ok(None) => {
                let err = Error::not_found(
                    self.config.role_name.as_str(),
                    format!("role not found: {}", self.config.role_name),
                );
                ConvergenceReport::permanent(status, err)
            }
            Err(e) => self.fail(status, e),
        }
    }

    /// Detach every managed policy, then delete the role
    #[instrument(skip(self, cancel), fields(role = %self.config.role_name))]
    pub async fn delete(&self, cancel: &CancellationToken) -> ConvergenceReport<IamRoleStatus> {
        let role_name = self.config.role_name.as_str();
        let mut status = self.status.clone();

        info!("Starting IAM role deletion");

        match self.get_role(cancel).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!("Role already deleted");
                status.attached_policies.clear();
                return ConvergenceReport::success(
                    status,
                    format!("Role {role_name} already deleted"),
                );
            }
            Err(e) => return self.fail(status, e),
        }

        let outcome = self
            .attachments
            .reconcile(role_name, &[], &status.attached_policies, cancel)
            .await;
        status.attached_policies = outcome.attached_list();
        if let Some(e) = outcome.error {
            return self.fail(status, e);
        }
        if outcome.detached_count > 0 {
            info!(count = outcome.detached_count, "Detached all policies");
        }

        let deleted = cancellable(cancel, role_name, || self.client.delete_role(role_name)).await;
        match deleted {
            Ok(()) => info!("Deleted IAM role"),
            Err(e) if e.is_not_found() => debug!("Role already gone during delete"),
            Err(e) => return self.fail(status, e),
        }

        ConvergenceReport::success(status, format!("Deleted role {role_name}"))
    }

    /// Report whether the role is gone
    #[instrument(skip(self, cancel), fields(role = %self.config.role_name))]
    pub async fn check_deleted(
        &self,
        cancel: &CancellationToken,
    ) -> ConvergenceReport<IamRoleStatus> {
        let status = self.status.clone();
        let role_name = &self.config.role_name;

        match self.get_role(cancel).await {
            Ok(None) => {
                info!("Role deletion confirmed");
                ConvergenceReport::success(status, format!("Role {role_name} deleted"))
            }
            Ok(Some(_)) => {
                debug!("Role still exists, deletion in progress");
                ConvergenceReport::in_progress(
                    status,
                    format!("Waiting for role {role_name} deletion"),
                )
            }
            Err(e) => self.fail(status, e),
        }
    }

    async fn get_role(&self, cancel: &CancellationToken) -> Result<Option<Role>> {
        let role_name = self.config.role_name.as_str();
        cancellable(cancel, role_name, || self.client.get_role(role_name)).await
    }

    fn fail(&self, status: IamRoleStatus, error: Error) -> ConvergenceReport<IamRoleStatus> {
        ConvergenceReport::for_error(status, error, self.classifier.as_ref())
    }
}

fn record_identity(status: &mut IamRoleStatus, role: &Role) {
    status.role_arn = role.arn.clone();
    status.role_id = role.role_id.clone();
    status.role_name = role.role_name.clone();
}
