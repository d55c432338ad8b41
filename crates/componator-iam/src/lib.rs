//! IAM role and IAM policy handlers
//!
//! Each handler parses its configuration and persisted status once per
//! reconcile, then runs the convergence passes against an [`IamClient`]:
//!
//! - [`role`] - roles: trust policy updates and managed-policy attachments
//! - [`policy`] - managed policies: versioned policy documents
//! - [`client`] - the IAM API boundary
//! - [`adapters`] - the IAM client seen through the convergence provider traits
//! - [`config`] - handler configuration, defaults and persisted status
//! - [`memory`] - an in-process IAM implementation for tests and local runs

#![deny(missing_docs)]

pub mod adapters;
pub mod client;
pub mod config;
pub mod memory;
pub mod policy;
pub mod role;

pub use adapters::{PolicyDocuments, RoleAttachments};
pub use client::{CreatePolicyRequest, CreateRoleRequest, IamClient, Policy, Role};
pub use config::{
    ConvergenceSettings, IamPolicyConfig, IamPolicyStatus, IamRoleConfig, IamRoleStatus,
};
pub use memory::InMemoryIam;
pub use policy::{IamPolicyOperations, IamPolicyOperationsFactory};
pub use role::{IamRoleOperations, IamRoleOperationsFactory};
