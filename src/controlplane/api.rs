//! Collaborator contract for the container-service control plane

use async_trait::async_trait;

use crate::controlplane::types::{CreateServiceArgs, Service, TaskDefinition, UpdateServiceArgs};
use crate::error::Result;

/// The five control-plane calls a reconciliation can make
///
/// Implementations must be side-effect free on `describe_*`; the mutating
/// calls are asynchronous on the control-plane side and return the
/// immediately-observed (not yet converged) state.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch the named service, `None` when it does not exist
    async fn describe_service(&self, cluster: &str, service: &str) -> Result<Option<Service>>;

    /// Resolve a task-definition reference (family, family:revision, or
    /// full identifier) to its registered revision
    async fn describe_task_definition(&self, reference: &str) -> Result<TaskDefinition>;

    /// Create a service; returns its initial observed state
    async fn create_service(&self, args: &CreateServiceArgs) -> Result<Service>;

    /// Apply in-place changes; returns the state observed right after
    async fn update_service(&self, args: &UpdateServiceArgs) -> Result<Service>;

    /// Begin teardown of a service already scaled to zero
    async fn delete_service(&self, cluster: &str, service: &str) -> Result<()>;
}
