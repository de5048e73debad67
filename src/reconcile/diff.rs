//! Drift detection between desired and observed service state
//!
//! Only fields the caller actually supplied participate; an explicitly
//! supplied zero is compared like any other value. The full set of
//! differing fields is collected so the outcome can say what drifted,
//! not just that something did.

use serde::Serialize;

use crate::controlplane::types::Service;
use crate::spec::DesiredSpec;

/// What the reconciler decided to do with this invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Every supplied field already matches the observed state
    Noop,
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Noop => write!(f, "noop"),
            Decision::Create => write!(f, "create"),
            Decision::Update => write!(f, "update"),
            Decision::Delete => write!(f, "delete"),
        }
    }
}

/// One comparable service field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DriftField {
    TaskDefinition,
    DesiredCount,
    MinimumHealthyPercent,
    MaximumPercent,
}

impl std::fmt::Display for DriftField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftField::TaskDefinition => write!(f, "taskDefinition"),
            DriftField::DesiredCount => write!(f, "desiredCount"),
            DriftField::MinimumHealthyPercent => write!(f, "minimumHealthyPercent"),
            DriftField::MaximumPercent => write!(f, "maximumPercent"),
        }
    }
}

/// The supplied fields whose desired values differ from observation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ServiceDrift {
    pub fields: Vec<DriftField>,
}

impl ServiceDrift {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Human-readable summary for logs and status lines
    pub fn summary(&self) -> String {
        if self.fields.is_empty() {
            "no supplied field differs".to_string()
        } else {
            let names: Vec<String> = self.fields.iter().map(|f| f.to_string()).collect();
            format!("{} field(s) drifted: {}", names.len(), names.join(", "))
        }
    }
}

/// Compare the supplied desired fields against an observed service.
///
/// `resolved_task_definition` is the fully-resolved form of the caller's
/// reference, so the comparison is identifier-to-identifier; `None` means
/// the caller did not supply one and it is not compared.
pub fn drift(
    desired: &DesiredSpec,
    observed: &Service,
    resolved_task_definition: Option<&str>,
) -> ServiceDrift {
    let mut fields = Vec::new();

    if let Some(resolved) = resolved_task_definition {
        if observed.task_definition.as_deref() != Some(resolved) {
            fields.push(DriftField::TaskDefinition);
        }
    }

    if let Some(count) = desired.desired_count {
        if observed.desired_count != count {
            fields.push(DriftField::DesiredCount);
        }
    }

    // A service with no rollout bounds at all still drifts from a spec
    // that supplies one
    let observed_config = observed.deployment_configuration.as_ref();
    if let Some(min) = desired.min_healthy_percent {
        if observed_config.and_then(|c| c.minimum_healthy_percent) != Some(min) {
            fields.push(DriftField::MinimumHealthyPercent);
        }
    }
    if let Some(max) = desired.max_percent {
        if observed_config.and_then(|c| c.maximum_percent) != Some(max) {
            fields.push(DriftField::MaximumPercent);
        }
    }

    ServiceDrift { fields }
}

/// Decide what this invocation must do to converge.
///
/// Absent and non-ACTIVE services need creating; an ACTIVE service needs
/// an update exactly when some supplied field drifts. Deletion is never
/// decided here: it is an explicit caller intent, not a convergence step.
pub fn decide(
    desired: &DesiredSpec,
    observed: Option<&Service>,
    resolved_task_definition: Option<&str>,
) -> Decision {
    match observed {
        Some(service) if service.status.is_active() => {
            if drift(desired, service, resolved_task_definition).is_empty() {
                Decision::Noop
            } else {
                Decision::Update
            }
        }
        _ => Decision::Create,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::types::{DeploymentConfiguration, ServiceStatus};

    fn create_observed_service() -> Service {
        Service {
            service_arn: Some("svc/default/web".to_string()),
            service_name: "web".to_string(),
            cluster_arn: None,
            status: ServiceStatus::Active,
            task_definition: Some("taskdef/web-task:3".to_string()),
            desired_count: 2,
            running_count: 2,
            pending_count: 0,
            role_arn: None,
            load_balancers: vec![],
            deployment_configuration: Some(DeploymentConfiguration {
                minimum_healthy_percent: Some(50),
                maximum_percent: Some(200),
            }),
            deployments: vec![],
            created_at: None,
        }
    }

    fn create_matching_spec() -> DesiredSpec {
        DesiredSpec {
            name: "web".to_string(),
            cluster: "default".to_string(),
            task_definition: Some("web-task:3".to_string()),
            desired_count: Some(2),
            load_balancer: None,
            min_healthy_percent: Some(50),
            max_percent: Some(200),
        }
    }

    #[test]
    fn test_absent_service_needs_create() {
        let spec = create_matching_spec();
        assert_eq!(
            decide(&spec, None, Some("taskdef/web-task:3")),
            Decision::Create
        );
    }

    #[test]
    fn test_non_active_service_needs_create() {
        let spec = create_matching_spec();
        for status in [
            ServiceStatus::Draining,
            ServiceStatus::Inactive,
            ServiceStatus::Unknown,
        ] {
            let mut observed = create_observed_service();
            observed.status = status;
            // Field equality is irrelevant when the service is not ACTIVE
            assert_eq!(
                decide(&spec, Some(&observed), Some("taskdef/web-task:3")),
                Decision::Create,
                "status {} should force a create",
                status
            );
        }
    }

    #[test]
    fn test_matching_service_is_noop() {
        let spec = create_matching_spec();
        let observed = create_observed_service();
        assert_eq!(
            decide(&spec, Some(&observed), Some("taskdef/web-task:3")),
            Decision::Noop
        );
    }

    #[test]
    fn test_task_definition_drift() {
        let spec = create_matching_spec();
        let observed = create_observed_service();

        let drifted = drift(&spec, &observed, Some("taskdef/web-task:4"));
        assert_eq!(drifted.fields, vec![DriftField::TaskDefinition]);
        assert_eq!(
            decide(&spec, Some(&observed), Some("taskdef/web-task:4")),
            Decision::Update
        );
    }

    #[test]
    fn test_desired_count_drift_includes_explicit_zero() {
        let mut spec = create_matching_spec();
        spec.desired_count = Some(0);
        let observed = create_observed_service();

        // Zero is a supplied value, not an absent one
        let drifted = drift(&spec, &observed, Some("taskdef/web-task:3"));
        assert_eq!(drifted.fields, vec![DriftField::DesiredCount]);
    }

    #[test]
    fn test_unsupplied_fields_are_never_compared() {
        let spec = DesiredSpec::new("web");
        let observed = create_observed_service();

        assert!(drift(&spec, &observed, None).is_empty());
        assert_eq!(decide(&spec, Some(&observed), None), Decision::Noop);
    }

    #[test]
    fn test_missing_observed_bounds_count_as_drift() {
        let mut spec = DesiredSpec::new("web");
        spec.min_healthy_percent = Some(50);

        let mut observed = create_observed_service();
        observed.deployment_configuration = None;

        let drifted = drift(&spec, &observed, None);
        assert_eq!(drifted.fields, vec![DriftField::MinimumHealthyPercent]);
    }

    #[test]
    fn test_all_drifted_fields_are_collected() {
        let mut spec = create_matching_spec();
        spec.desired_count = Some(5);
        spec.max_percent = Some(150);
        let observed = create_observed_service();

        let drifted = drift(&spec, &observed, Some("taskdef/web-task:9"));
        assert_eq!(
            drifted.fields,
            vec![
                DriftField::TaskDefinition,
                DriftField::DesiredCount,
                DriftField::MaximumPercent,
            ]
        );
        assert_eq!(
            drifted.summary(),
            "3 field(s) drifted: taskDefinition, desiredCount, maximumPercent"
        );
    }

    #[test]
    fn test_decision_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(Decision::Noop).unwrap(),
            serde_json::json!("noop")
        );
        assert_eq!(
            serde_json::to_value(DriftField::DesiredCount).unwrap(),
            serde_json::json!("desiredCount")
        );
    }
}
