//! Deterministic in-memory control plane
//!
//! Behaves like the real thing at the contract level: mutations return the
//! immediately-observed state, and convergence (rollouts finishing, drains
//! completing) happens over subsequent describe polls. With the default of
//! zero settle polls every mutation converges instantly, which keeps most
//! tests short; waiter tests opt into latency via [`with_settle_polls`].
//!
//! Every call is recorded, so tests can assert both payloads and ordering.
//!
//! [`with_settle_polls`]: MemoryControlPlane::with_settle_polls

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::controlplane::api::ControlPlane;
use crate::controlplane::types::{
    CreateServiceArgs, Deployment, DeploymentConfiguration, Service, ServiceStatus,
    TaskDefinition, TaskDefinitionStatus, UpdateServiceArgs,
};
use crate::error::{Error, Result};

/// One control-plane call as the plane saw it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCall {
    DescribeService { cluster: String, service: String },
    DescribeTaskDefinition { reference: String },
    CreateService(CreateServiceArgs),
    UpdateService(UpdateServiceArgs),
    DeleteService { cluster: String, service: String },
}

impl RecordedCall {
    /// Operation name, for ordering assertions
    pub fn operation(&self) -> &'static str {
        match self {
            RecordedCall::DescribeService { .. } => "DescribeServices",
            RecordedCall::DescribeTaskDefinition { .. } => "DescribeTaskDefinition",
            RecordedCall::CreateService(_) => "CreateService",
            RecordedCall::UpdateService(_) => "UpdateService",
            RecordedCall::DeleteService { .. } => "DeleteService",
        }
    }
}

struct ServiceRecord {
    service: Service,
    /// Describe polls remaining until the in-flight change settles
    settle_in: u32,
}

struct Inner {
    services: HashMap<(String, String), ServiceRecord>,
    task_definitions: Vec<TaskDefinition>,
    calls: Vec<RecordedCall>,
    fail_next: Option<(&'static str, String)>,
}

/// In-process [`ControlPlane`] for tests and hermetic embeddings
pub struct MemoryControlPlane {
    settle_polls: u32,
    inner: Mutex<Inner>,
}

impl Default for MemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self {
            settle_polls: 0,
            inner: Mutex::new(Inner {
                services: HashMap::new(),
                task_definitions: Vec::new(),
                calls: Vec::new(),
                fail_next: None,
            }),
        }
    }

    /// Require `polls` describe calls before a mutation converges
    pub fn with_settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls;
        self
    }

    /// Register a task definition revision; returns the registered record
    pub fn register_task_definition(
        &self,
        family: &str,
        revision: u32,
        status: TaskDefinitionStatus,
    ) -> TaskDefinition {
        let td = TaskDefinition {
            task_definition_arn: format!("taskdef/{}:{}", family, revision),
            family: Some(family.to_string()),
            revision: Some(revision),
            status,
        };
        self.inner
            .lock()
            .expect("control plane lock poisoned")
            .task_definitions
            .push(td.clone());
        td
    }

    /// Place a service directly into the plane, bypassing CreateService
    pub fn seed_service(&self, cluster: &str, service: Service) {
        let mut inner = self.inner.lock().expect("control plane lock poisoned");
        inner.services.insert(
            (cluster.to_string(), service.service_name.clone()),
            ServiceRecord {
                service,
                settle_in: 0,
            },
        );
    }

    /// Fail the next call whose operation matches, once
    pub fn fail_next_call(&self, operation: &'static str, message: &str) {
        self.inner
            .lock()
            .expect("control plane lock poisoned")
            .fail_next = Some((operation, message.to_string()));
    }

    /// Everything the plane has been asked to do, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner
            .lock()
            .expect("control plane lock poisoned")
            .calls
            .clone()
    }

    /// Current snapshot of a stored service, without recording a call
    pub fn stored_service(&self, cluster: &str, service: &str) -> Option<Service> {
        self.inner
            .lock()
            .expect("control plane lock poisoned")
            .services
            .get(&(cluster.to_string(), service.to_string()))
            .map(|r| r.service.clone())
    }
}

fn check_injected_failure(inner: &mut Inner, operation: &'static str) -> Result<()> {
    let armed = inner
        .fail_next
        .as_ref()
        .is_some_and(|(op, _)| *op == operation);
    if armed {
        if let Some((_, message)) = inner.fail_next.take() {
            return Err(Error::ApiError { operation, message });
        }
    }
    Ok(())
}

fn resolve_reference<'a>(
    task_definitions: &'a [TaskDefinition],
    reference: &str,
) -> Option<&'a TaskDefinition> {
    // Full identifier, then family:revision, then newest revision of a family
    if let Some(td) = task_definitions
        .iter()
        .find(|td| td.task_definition_arn == reference)
    {
        return Some(td);
    }
    if let Some((family, revision)) = reference.rsplit_once(':') {
        if let Ok(revision) = revision.parse::<u32>() {
            return task_definitions
                .iter()
                .find(|td| td.family.as_deref() == Some(family) && td.revision == Some(revision));
        }
    }
    task_definitions
        .iter()
        .filter(|td| td.family.as_deref() == Some(reference))
        .max_by_key(|td| td.revision)
}

/// Collapse any in-flight change into its converged end state
fn settle(service: &mut Service) {
    match service.status {
        ServiceStatus::Draining => {
            service.status = ServiceStatus::Inactive;
            service.running_count = 0;
            service.pending_count = 0;
            service.deployments.clear();
        }
        ServiceStatus::Active => {
            service.running_count = service.desired_count;
            service.pending_count = 0;
            service
                .deployments
                .retain(|d| d.status.as_deref() == Some("PRIMARY"));
            for deployment in &mut service.deployments {
                deployment.desired_count = service.desired_count;
                deployment.running_count = service.desired_count;
                deployment.pending_count = 0;
            }
        }
        _ => {}
    }
}

fn primary_deployment(task_definition: &str, desired_count: u32, converged: bool) -> Deployment {
    Deployment {
        id: Some(format!("rollout-{}", Utc::now().timestamp_micros())),
        status: Some("PRIMARY".to_string()),
        task_definition: Some(task_definition.to_string()),
        desired_count,
        running_count: if converged { desired_count } else { 0 },
        pending_count: if converged { 0 } else { desired_count },
        created_at: Some(Utc::now()),
        updated_at: Some(Utc::now()),
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn describe_service(&self, cluster: &str, service: &str) -> Result<Option<Service>> {
        let mut inner = self.inner.lock().expect("control plane lock poisoned");
        inner.calls.push(RecordedCall::DescribeService {
            cluster: cluster.to_string(),
            service: service.to_string(),
        });
        check_injected_failure(&mut inner, "DescribeServices")?;

        let key = (cluster.to_string(), service.to_string());
        let Some(record) = inner.services.get_mut(&key) else {
            return Ok(None);
        };

        if record.settle_in > 0 {
            record.settle_in -= 1;
            if record.settle_in == 0 {
                settle(&mut record.service);
            }
        }

        Ok(Some(record.service.clone()))
    }

    async fn describe_task_definition(&self, reference: &str) -> Result<TaskDefinition> {
        let mut inner = self.inner.lock().expect("control plane lock poisoned");
        inner.calls.push(RecordedCall::DescribeTaskDefinition {
            reference: reference.to_string(),
        });
        check_injected_failure(&mut inner, "DescribeTaskDefinition")?;

        resolve_reference(&inner.task_definitions, reference)
            .cloned()
            .ok_or_else(|| Error::ApiError {
                operation: "DescribeTaskDefinition",
                message: format!("unable to resolve task definition '{}'", reference),
            })
    }

    async fn create_service(&self, args: &CreateServiceArgs) -> Result<Service> {
        let mut inner = self.inner.lock().expect("control plane lock poisoned");
        inner.calls.push(RecordedCall::CreateService(args.clone()));
        check_injected_failure(&mut inner, "CreateService")?;

        let key = (args.cluster.clone(), args.service_name.clone());
        if let Some(existing) = inner.services.get(&key) {
            if existing.service.status != ServiceStatus::Inactive {
                return Err(Error::ApiError {
                    operation: "CreateService",
                    message: format!("service '{}' already exists", args.service_name),
                });
            }
        }

        let resolved = resolve_reference(&inner.task_definitions, &args.task_definition)
            .map(|td| td.task_definition_arn.clone())
            .ok_or_else(|| Error::ApiError {
                operation: "CreateService",
                message: format!(
                    "unable to resolve task definition '{}'",
                    args.task_definition
                ),
            })?;

        let converged = self.settle_polls == 0;
        let service = Service {
            service_arn: Some(format!("svc/{}/{}", args.cluster, args.service_name)),
            service_name: args.service_name.clone(),
            cluster_arn: Some(format!("cluster/{}", args.cluster)),
            status: ServiceStatus::Active,
            task_definition: Some(resolved.clone()),
            desired_count: args.desired_count,
            running_count: if converged { args.desired_count } else { 0 },
            pending_count: if converged { 0 } else { args.desired_count },
            role_arn: args.role.as_ref().map(|r| format!("role/{}", r)),
            load_balancers: args.load_balancers.clone().unwrap_or_default(),
            deployment_configuration: args.deployment_configuration.clone(),
            deployments: vec![primary_deployment(&resolved, args.desired_count, converged)],
            created_at: Some(Utc::now()),
        };

        inner.services.insert(
            key,
            ServiceRecord {
                service: service.clone(),
                settle_in: self.settle_polls,
            },
        );
        Ok(service)
    }

    async fn update_service(&self, args: &UpdateServiceArgs) -> Result<Service> {
        let mut inner = self.inner.lock().expect("control plane lock poisoned");
        inner.calls.push(RecordedCall::UpdateService(args.clone()));
        check_injected_failure(&mut inner, "UpdateService")?;

        let resolved = match &args.task_definition {
            Some(reference) => Some(
                resolve_reference(&inner.task_definitions, reference)
                    .map(|td| td.task_definition_arn.clone())
                    .ok_or_else(|| Error::ApiError {
                        operation: "UpdateService",
                        message: format!("unable to resolve task definition '{}'", reference),
                    })?,
            ),
            None => None,
        };

        let key = (args.cluster.clone(), args.service.clone());
        let settle_polls = self.settle_polls;
        let record = inner.services.get_mut(&key).ok_or_else(|| Error::ApiError {
            operation: "UpdateService",
            message: format!("service '{}' not found", args.service),
        })?;

        let service = &mut record.service;
        if let Some(count) = args.desired_count {
            service.desired_count = count;
        }
        if let Some(resolved) = resolved {
            // A task definition change starts a new rollout; the old one
            // lingers until the change settles
            let previous = service.deployments.first().cloned();
            service.task_definition = Some(resolved.clone());
            service.deployments =
                vec![primary_deployment(&resolved, service.desired_count, false)];
            if let Some(mut old) = previous {
                old.status = Some("ACTIVE".to_string());
                service.deployments.push(old);
            }
        }
        if let Some(config) = &args.deployment_configuration {
            let existing = service.deployment_configuration.clone().unwrap_or_default();
            service.deployment_configuration = Some(DeploymentConfiguration {
                minimum_healthy_percent: config
                    .minimum_healthy_percent
                    .or(existing.minimum_healthy_percent),
                maximum_percent: config.maximum_percent.or(existing.maximum_percent),
            });
        }

        record.settle_in = settle_polls;
        if settle_polls == 0 {
            settle(&mut record.service);
        }
        Ok(record.service.clone())
    }

    async fn delete_service(&self, cluster: &str, service: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("control plane lock poisoned");
        inner.calls.push(RecordedCall::DeleteService {
            cluster: cluster.to_string(),
            service: service.to_string(),
        });
        check_injected_failure(&mut inner, "DeleteService")?;

        let key = (cluster.to_string(), service.to_string());
        let settle_polls = self.settle_polls;
        let record = inner.services.get_mut(&key).ok_or_else(|| Error::ApiError {
            operation: "DeleteService",
            message: format!("service '{}' not found", service),
        })?;

        record.service.status = ServiceStatus::Draining;
        record.settle_in = settle_polls;
        if settle_polls == 0 {
            settle(&mut record.service);
        }
        Ok(())
    }
}
