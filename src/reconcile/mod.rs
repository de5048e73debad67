//! Reconciliation flow for one managed container service
//!
//! A single invocation converges a single service: fetch the observed
//! state, decide which operation is needed, execute it, optionally wait
//! for the control plane to stabilize, and report what happened. Any
//! error aborts the rest of the run; there is no partial-success outcome.

pub mod diff;
pub mod waiter;


pub use diff::{decide, drift, Decision, DriftField, ServiceDrift};
pub use waiter::{wait_for, WaitCondition, WaitPolicy};

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::controlplane::api::ControlPlane;
use crate::controlplane::types::{
    CreateServiceArgs, DeploymentConfiguration, LoadBalancer, Service, UpdateServiceArgs,
};
use crate::error::{Error, Result};
use crate::spec::{DesiredSpec, Mode};

/// Wait and dry-run switches for one reconciliation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// After a create or update, block until the service is stable
    pub wait_until_stable: bool,
    /// After a delete, block until the service reaches INACTIVE
    pub wait_until_inactive: bool,
    /// Perform every read and the decision, but skip all mutating calls
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            wait_until_stable: false,
            wait_until_inactive: true,
            dry_run: false,
        }
    }
}

/// What one reconciliation did, or under dry run would have done
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    /// True when a mutating operation ran (or would have run)
    pub changed: bool,
    pub action: Decision,
    /// Names the supplied fields that forced an update; absent for every
    /// other action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<ServiceDrift>,
    /// Final service representation. Absent when the service does not
    /// exist, and for a dry-run create where there is nothing to show yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
}

/// Drives one service toward its desired state through a [`ControlPlane`]
pub struct ServiceReconciler<C> {
    api: C,
    wait_policy: WaitPolicy,
}

impl<C: ControlPlane> ServiceReconciler<C> {
    pub fn new(api: C) -> Self {
        Self {
            api,
            wait_policy: WaitPolicy::default(),
        }
    }

    /// Override the default stabilization policy (15 s between polls,
    /// 40 attempts)
    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    /// The control plane this reconciler operates through
    pub fn control_plane(&self) -> &C {
        &self.api
    }

    /// Converge one service and report the outcome
    #[instrument(skip(self, desired, options), fields(cluster = %desired.cluster, service = %desired.name, mode = %mode))]
    pub async fn reconcile(
        &self,
        desired: &DesiredSpec,
        mode: Mode,
        options: &ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        desired.validate(mode).map_err(|errors| {
            let details: Vec<String> = errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            Error::ConfigError(details.join("; "))
        })?;

        info!(
            "Reconciling service {}/{} (mode: {})",
            desired.cluster, desired.name, mode
        );

        let observed = self
            .api
            .describe_service(&desired.cluster, &desired.name)
            .await?;
        debug!(
            "observed state: {}",
            observed
                .as_ref()
                .map(|s| s.status.to_string())
                .unwrap_or_else(|| "absent".to_string())
        );

        match mode {
            Mode::Delete => self.delete(desired, observed, options).await,
            Mode::Create | Mode::Update => self.converge(desired, mode, observed, options).await,
        }
    }

    /// Create/update path: resolve the task definition, decide, execute
    async fn converge(
        &self,
        desired: &DesiredSpec,
        mode: Mode,
        observed: Option<Service>,
        options: &ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let resolved = match &desired.task_definition {
            Some(reference) => Some(self.resolve_task_definition(reference).await?),
            None => None,
        };

        let decision = decide(desired, observed.as_ref(), resolved.as_deref());
        debug!("decision: {}", decision);

        if mode == Mode::Update && decision == Decision::Create {
            // Update mode never creates: a missing or non-ACTIVE service
            // cannot be converged in place
            return Err(Error::NotFound {
                cluster: desired.cluster.clone(),
                service: desired.name.clone(),
            });
        }

        match decision {
            Decision::Create => self.execute_create(desired, observed, options).await,
            Decision::Update => {
                let report = observed
                    .as_ref()
                    .map(|service| drift(desired, service, resolved.as_deref()))
                    .unwrap_or_default();
                self.execute_update(desired, observed, report, options).await
            }
            // decide() never yields Delete; nothing is left to change
            _ => {
                info!(
                    "Service {}/{} already matches the desired state",
                    desired.cluster, desired.name
                );
                Ok(ReconcileOutcome {
                    changed: false,
                    action: Decision::Noop,
                    drift: None,
                    service: observed,
                })
            }
        }
    }

    /// Resolve a task-definition reference and require it to be active
    async fn resolve_task_definition(&self, reference: &str) -> Result<String> {
        let task_definition = self.api.describe_task_definition(reference).await?;
        if !task_definition.status.is_active() {
            return Err(Error::ConfigError(format!(
                "task definition '{}' is not active",
                reference
            )));
        }
        Ok(task_definition.task_definition_arn)
    }

    async fn execute_create(
        &self,
        desired: &DesiredSpec,
        observed: Option<Service>,
        options: &ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        if options.dry_run {
            info!(
                "Dry run: would create service {}/{}",
                desired.cluster, desired.name
            );
            return Ok(ReconcileOutcome {
                changed: true,
                action: Decision::Create,
                drift: None,
                service: observed,
            });
        }

        let args = build_create_args(desired)?;
        info!(
            "Creating service {}/{} ({} instance(s) of {})",
            desired.cluster, desired.name, args.desired_count, args.task_definition
        );
        let created = self.api.create_service(&args).await?;

        let service = if options.wait_until_stable {
            wait_for(
                &self.api,
                &desired.cluster,
                &desired.name,
                WaitCondition::Stable,
                &self.wait_policy,
            )
            .await?
        } else {
            Some(created)
        };

        Ok(ReconcileOutcome {
            changed: true,
            action: Decision::Create,
            drift: None,
            service,
        })
    }

    async fn execute_update(
        &self,
        desired: &DesiredSpec,
        observed: Option<Service>,
        report: ServiceDrift,
        options: &ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        info!(
            "Service {}/{} needs an update: {}",
            desired.cluster,
            desired.name,
            report.summary()
        );

        if options.dry_run {
            info!(
                "Dry run: would update service {}/{}",
                desired.cluster, desired.name
            );
            return Ok(ReconcileOutcome {
                changed: true,
                action: Decision::Update,
                drift: Some(report),
                service: observed,
            });
        }

        let args = build_update_args(desired);
        let updated = self.api.update_service(&args).await?;

        let service = if options.wait_until_stable {
            wait_for(
                &self.api,
                &desired.cluster,
                &desired.name,
                WaitCondition::Stable,
                &self.wait_policy,
            )
            .await?
        } else {
            Some(updated)
        };

        Ok(ReconcileOutcome {
            changed: true,
            action: Decision::Update,
            drift: Some(report),
            service,
        })
    }

    /// Delete path: zero out capacity, delete, optionally wait for INACTIVE
    ///
    /// A failure at any step leaves the service as-is for the operator to
    /// retry; there is no partial-delete recovery.
    async fn delete(
        &self,
        desired: &DesiredSpec,
        observed: Option<Service>,
        options: &ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let Some(service) = observed else {
            return Err(Error::NotFound {
                cluster: desired.cluster.clone(),
                service: desired.name.clone(),
            });
        };

        if !service.status.is_active() {
            // Already on its way out; deleting again is a no-op
            info!(
                "Service {}/{} is already {}, nothing to delete",
                desired.cluster, desired.name, service.status
            );
            return Ok(ReconcileOutcome {
                changed: false,
                action: Decision::Noop,
                drift: None,
                service: Some(service),
            });
        }

        if options.dry_run {
            info!(
                "Dry run: would delete service {}/{}",
                desired.cluster, desired.name
            );
            return Ok(ReconcileOutcome {
                changed: true,
                action: Decision::Delete,
                drift: None,
                service: Some(service),
            });
        }

        // Scale to zero first so the control plane drains tasks gracefully
        // instead of killing them at delete time
        info!(
            "Draining service {}/{} ({} running task(s))",
            desired.cluster, desired.name, service.running_count
        );
        let drain = UpdateServiceArgs {
            cluster: desired.cluster.clone(),
            service: desired.name.clone(),
            task_definition: None,
            desired_count: Some(0),
            deployment_configuration: None,
        };
        self.api.update_service(&drain).await?;

        info!("Deleting service {}/{}", desired.cluster, desired.name);
        self.api
            .delete_service(&desired.cluster, &desired.name)
            .await?;

        let service = if options.wait_until_inactive {
            wait_for(
                &self.api,
                &desired.cluster,
                &desired.name,
                WaitCondition::Inactive,
                &self.wait_policy,
            )
            .await?
        } else {
            // Single snapshot of whatever state the delete left behind
            self.api
                .describe_service(&desired.cluster, &desired.name)
                .await?
        };

        Ok(ReconcileOutcome {
            changed: true,
            action: Decision::Delete,
            drift: None,
            service,
        })
    }
}

/// Assemble the create call. Only supplied optional fields make it into
/// the args, so omitted ones never reach the wire.
fn build_create_args(desired: &DesiredSpec) -> Result<CreateServiceArgs> {
    let task_definition = desired.task_definition.clone().ok_or_else(|| {
        Error::ConfigError("task_definition is required when creating a service".to_string())
    })?;
    let desired_count = desired.desired_count.ok_or_else(|| {
        Error::ConfigError("desired_count is required when creating a service".to_string())
    })?;

    Ok(CreateServiceArgs {
        cluster: desired.cluster.clone(),
        service_name: desired.name.clone(),
        task_definition,
        desired_count,
        role: desired.load_balancer.as_ref().map(|b| b.role.clone()),
        load_balancers: desired
            .load_balancer
            .as_ref()
            .map(|b| vec![LoadBalancer::from(b)]),
        deployment_configuration: deployment_configuration(desired),
    })
}

/// Assemble the update call from the supplied fields. The args type has
/// no load-balancer field, so a binding can never leak into an update.
fn build_update_args(desired: &DesiredSpec) -> UpdateServiceArgs {
    UpdateServiceArgs {
        cluster: desired.cluster.clone(),
        service: desired.name.clone(),
        task_definition: desired.task_definition.clone(),
        desired_count: desired.desired_count,
        deployment_configuration: deployment_configuration(desired),
    }
}

/// Rollout bounds as a wire object, or nothing when neither was supplied
fn deployment_configuration(desired: &DesiredSpec) -> Option<DeploymentConfiguration> {
    let config = DeploymentConfiguration {
        minimum_healthy_percent: desired.min_healthy_percent,
        maximum_percent: desired.max_percent,
    };
    (!config.is_empty()).then_some(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::LoadBalancerBinding;

    #[test]
    fn test_default_options_match_collaborator_defaults() {
        let options = ReconcileOptions::default();
        assert!(!options.wait_until_stable);
        assert!(options.wait_until_inactive);
        assert!(!options.dry_run);
    }

    #[test]
    fn test_build_create_args_minimal() {
        let mut spec = DesiredSpec::new("web");
        spec.task_definition = Some("web-task:3".to_string());
        spec.desired_count = Some(2);

        let args = build_create_args(&spec).unwrap();
        assert_eq!(args.task_definition, "web-task:3");
        assert_eq!(args.desired_count, 2);
        assert!(args.role.is_none());
        assert!(args.load_balancers.is_none());
        assert!(args.deployment_configuration.is_none());
    }

    #[test]
    fn test_build_create_args_with_binding_and_bounds() {
        let mut spec = DesiredSpec::new("web");
        spec.task_definition = Some("web-task".to_string());
        spec.desired_count = Some(2);
        spec.load_balancer = Some(LoadBalancerBinding {
            load_balancer_name: "front-lb".to_string(),
            container_name: "web".to_string(),
            container_port: 8080,
            role: "service-role".to_string(),
        });
        spec.min_healthy_percent = Some(50);

        let args = build_create_args(&spec).unwrap();
        assert_eq!(args.role.as_deref(), Some("service-role"));
        let balancers = args.load_balancers.unwrap();
        assert_eq!(balancers.len(), 1);
        assert_eq!(balancers[0].container_port, 8080);

        let config = args.deployment_configuration.unwrap();
        assert_eq!(config.minimum_healthy_percent, Some(50));
        assert_eq!(config.maximum_percent, None);
    }

    #[test]
    fn test_build_create_args_requires_task_definition() {
        let mut spec = DesiredSpec::new("web");
        spec.desired_count = Some(2);

        match build_create_args(&spec) {
            Err(Error::ConfigError(msg)) => assert!(msg.contains("task_definition")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn test_build_update_args_only_supplied_fields() {
        let mut spec = DesiredSpec::new("web");
        spec.desired_count = Some(4);

        let args = build_update_args(&spec);
        assert_eq!(args.desired_count, Some(4));
        assert!(args.task_definition.is_none());
        assert!(args.deployment_configuration.is_none());
    }
}
