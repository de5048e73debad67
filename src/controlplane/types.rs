//! Wire types for the container-service control plane
//!
//! Entities mirror the control plane's camelCase JSON. Call-argument
//! structs keep every optional field as `Option` and skip `None` on
//! serialization, so a field the caller never supplied is absent from the
//! payload rather than sent as an explicit unset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spec::LoadBalancerBinding;

/// Timestamp codec: accepts epoch seconds (fractional) or RFC 3339 on the
/// way in, always renders RFC 3339 on the way out. Control planes report
/// epoch floats; everything this crate emits is an ISO-8601 string.
pub(crate) mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Epoch(f64),
            Text(String),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Epoch(secs)) => {
                let nanos = (secs.fract() * 1e9).round() as u32;
                DateTime::from_timestamp(secs.trunc() as i64, nanos)
                    .map(Some)
                    .ok_or_else(|| {
                        serde::de::Error::custom(format!("timestamp out of range: {}", secs))
                    })
            }
            Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Lifecycle status of a service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    /// Serving traffic and accepting changes
    Active,
    /// Tearing down; tasks are stopping
    Draining,
    /// Fully stopped; the record may be reaped at any time
    Inactive,
    /// Status string this crate does not know about
    #[serde(other)]
    Unknown,
}

impl ServiceStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ServiceStatus::Active)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Active => write!(f, "ACTIVE"),
            ServiceStatus::Draining => write!(f, "DRAINING"),
            ServiceStatus::Inactive => write!(f, "INACTIVE"),
            ServiceStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Lifecycle status of a task definition revision
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskDefinitionStatus {
    #[default]
    Active,
    Inactive,
    /// Status string this crate does not know about
    #[serde(other)]
    Unknown,
}

impl TaskDefinitionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TaskDefinitionStatus::Active)
    }
}

/// Rollout bounds applied while the control plane replaces tasks
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_healthy_percent: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_percent: Option<u32>,
}

impl DeploymentConfiguration {
    pub fn is_empty(&self) -> bool {
        self.minimum_healthy_percent.is_none() && self.maximum_percent.is_none()
    }
}

/// Wire form of a load-balancer attachment
///
/// The registration role travels as a separate top-level create argument,
/// not inside this record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    pub load_balancer_name: String,
    pub container_name: String,
    pub container_port: u16,
}

impl From<&LoadBalancerBinding> for LoadBalancer {
    fn from(binding: &LoadBalancerBinding) -> Self {
        Self {
            load_balancer_name: binding.load_balancer_name.clone(),
            container_name: binding.container_name.clone(),
            container_port: binding.container_port,
        }
    }
}

/// One in-flight or settled rollout of a service
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Deployment {
    pub id: Option<String>,
    /// PRIMARY for the newest rollout, ACTIVE for ones still winding down
    pub status: Option<String>,
    pub task_definition: Option<String>,
    pub desired_count: u32,
    pub running_count: u32,
    pub pending_count: u32,
    #[serde(with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Observed state of one managed service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_arn: Option<String>,
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_arn: Option<String>,
    pub status: ServiceStatus,
    /// Fully-resolved task definition the service currently runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<String>,
    #[serde(default)]
    pub desired_count: u32,
    #[serde(default)]
    pub running_count: u32,
    #[serde(default)]
    pub pending_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_balancers: Vec<LoadBalancer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<DeploymentConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployments: Vec<Deployment>,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Service {
    /// A service is stable when it is ACTIVE, exactly one rollout remains,
    /// and the running count has converged on the desired count.
    pub fn is_stable(&self) -> bool {
        self.status.is_active()
            && self.deployments.len() == 1
            && self.running_count == self.desired_count
    }
}

/// A registered task definition revision
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub task_definition_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u32>,
    #[serde(default)]
    pub status: TaskDefinitionStatus,
}

/// Arguments for creating a service. Optional fields the caller leaves
/// unset never reach the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceArgs {
    pub cluster: String,
    pub service_name: String,
    /// Caller's reference, resolved again by the control plane
    pub task_definition: String,
    pub desired_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancers: Option<Vec<LoadBalancer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<DeploymentConfiguration>,
}

/// Arguments for updating a service in place. There is deliberately no
/// load-balancer field here: bindings are immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServiceArgs {
    pub cluster: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<DeploymentConfiguration>,
}
