//! Desired-state input for a managed container service
//!
//! A [`DesiredSpec`] describes the single service one invocation converges.
//! It is plain data: construction and validation never touch the network.
//! Specs deserialize from YAML so desired state can live in a file.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Structured validation error for [`DesiredSpec`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
    pub how_to_fix: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        how_to_fix: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            how_to_fix: how_to_fix.into(),
        }
    }
}

/// Reconciliation mode requested by the caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Ensure the service exists, creating or converging as needed
    Create,
    /// Converge an existing service in place; absence is an error
    Update,
    /// Drain and remove the service
    Delete,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Create => write!(f, "create"),
            Mode::Update => write!(f, "update"),
            Mode::Delete => write!(f, "delete"),
        }
    }
}

/// Load-balancer binding attached at service creation
///
/// The control plane treats the binding as immutable once the service
/// exists, so the four fields are held together: a partial binding is
/// unrepresentable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerBinding {
    pub load_balancer_name: String,
    pub container_name: String,
    pub container_port: u16,
    /// Identity the control plane assumes to register targets
    pub role: String,
}

impl LoadBalancerBinding {
    /// Assemble a binding from four independently-optional inputs.
    ///
    /// All four absent means no binding; all four present means a binding;
    /// anything in between is a configuration error, raised before any
    /// network call is made.
    pub fn from_parts(
        load_balancer_name: Option<String>,
        container_name: Option<String>,
        container_port: Option<u16>,
        role: Option<String>,
    ) -> Result<Option<Self>> {
        match (load_balancer_name, container_name, container_port, role) {
            (None, None, None, None) => Ok(None),
            (Some(load_balancer_name), Some(container_name), Some(container_port), Some(role)) => {
                Ok(Some(Self {
                    load_balancer_name,
                    container_name,
                    container_port,
                    role,
                }))
            }
            _ => Err(Error::ConfigError(
                "load_balancer_name, container_name, container_port and role \
                 must be supplied together"
                    .to_string(),
            )),
        }
    }
}

fn default_cluster() -> String {
    "default".to_string()
}

/// Desired state for one managed container service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DesiredSpec {
    /// Service name, unique within its cluster
    pub name: String,

    #[serde(default = "default_cluster")]
    pub cluster: String,

    /// Task definition reference: family, family:revision, or a full
    /// identifier. Required for create mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<String>,

    /// Number of task instances to run. `Some(0)` is a valid, explicitly
    /// supplied value and is distinct from "not supplied".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancerBinding>,

    /// Lower bound (percent of desired count) kept running during rollouts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_healthy_percent: Option<u32>,

    /// Upper bound (percent of desired count) allowed during rollouts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_percent: Option<u32>,
}

impl DesiredSpec {
    /// Minimal spec: named service in the default cluster, nothing supplied
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster: default_cluster(),
            task_definition: None,
            desired_count: None,
            load_balancer: None,
            min_healthy_percent: None,
            max_percent: None,
        }
    }

    /// True when at least one convergeable field is supplied
    pub fn has_updatable_fields(&self) -> bool {
        self.task_definition.is_some()
            || self.desired_count.is_some()
            || self.min_healthy_percent.is_some()
            || self.max_percent.is_some()
    }

    /// Validate the spec for the requested mode
    ///
    /// Create needs enough to build a service from scratch; update needs
    /// something to converge; delete needs only the name. All failures are
    /// reported together.
    pub fn validate(&self, mode: Mode) -> std::result::Result<(), Vec<SpecValidationError>> {
        let mut errors: Vec<SpecValidationError> = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "name",
                "service name must not be empty",
                "Set name to the service's name within its cluster.",
            ));
        }

        match mode {
            Mode::Create => {
                if self.task_definition.is_none() {
                    errors.push(SpecValidationError::new(
                        "task_definition",
                        "task_definition is required when creating a service",
                        "Set task_definition to a family, family:revision, or full identifier.",
                    ));
                }
                if self.desired_count.is_none() {
                    errors.push(SpecValidationError::new(
                        "desired_count",
                        "desired_count is required when creating a service",
                        "Set desired_count to the number of task instances to run (0 is valid).",
                    ));
                }
            }
            Mode::Update => {
                if !self.has_updatable_fields() {
                    errors.push(SpecValidationError::new(
                        "task_definition / desired_count / min_healthy_percent / max_percent",
                        "update mode needs at least one field to converge",
                        "Supply the field(s) that should change, or use create mode to \
                         assert presence only.",
                    ));
                }
            }
            Mode::Delete => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Load a spec from a YAML file
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::SpecFileError(format!("{}: {}", path.display(), e)))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::SpecFileError(format!("{}: {}", path.display(), e)))
    }
}
