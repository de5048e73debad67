//! Bounded stabilization waiter
//!
//! Polls the control plane at a fixed interval until the target condition
//! holds or the attempt budget runs out. Time flows through tokio's clock,
//! so tests drive this under a paused runtime with no real delay.

use std::time::Duration;

use tracing::{debug, warn};

use crate::controlplane::api::ControlPlane;
use crate::controlplane::types::{Service, ServiceStatus};
use crate::error::{Error, Result};

/// Observable end states a wait can target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitCondition {
    /// ACTIVE, a single rollout, and running count equal to desired count
    Stable,
    /// Status INACTIVE; a service that has disappeared entirely also
    /// counts, since control planes may reap inactive records
    Inactive,
}

impl WaitCondition {
    fn is_satisfied(&self, observed: Option<&Service>) -> bool {
        match (self, observed) {
            (WaitCondition::Stable, Some(service)) => service.is_stable(),
            (WaitCondition::Stable, None) => false,
            (WaitCondition::Inactive, Some(service)) => {
                service.status == ServiceStatus::Inactive
            }
            (WaitCondition::Inactive, None) => true,
        }
    }
}

impl std::fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitCondition::Stable => write!(f, "stable"),
            WaitCondition::Inactive => write!(f, "inactive"),
        }
    }
}

/// Poll cadence and attempt bound for one wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for WaitPolicy {
    /// Matches the control plane's documented waiter policy: a poll every
    /// 15 seconds, 40 attempts, 10 minutes end to end.
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            max_attempts: 40,
        }
    }
}

/// Poll until `condition` holds, returning the satisfying snapshot.
///
/// Describe errors abort the wait immediately. Exhausting the attempt
/// budget is [`Error::WaitTimeout`]: the preceding operation may still
/// converge on its own, so callers must treat it as indeterminate rather
/// than failed.
pub async fn wait_for<C>(
    api: &C,
    cluster: &str,
    service: &str,
    condition: WaitCondition,
    policy: &WaitPolicy,
) -> Result<Option<Service>>
where
    C: ControlPlane + ?Sized,
{
    for attempt in 1..=policy.max_attempts {
        let observed = api.describe_service(cluster, service).await?;
        if condition.is_satisfied(observed.as_ref()) {
            debug!(
                "service '{}' became {} after {} attempt(s)",
                service, condition, attempt
            );
            return Ok(observed);
        }

        debug!(
            "service '{}' not yet {} (attempt {}/{})",
            service, condition, attempt, policy.max_attempts
        );
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.poll_interval).await;
        }
    }

    warn!(
        "gave up waiting for service '{}' to become {} after {} attempts",
        service, condition, policy.max_attempts
    );
    Err(Error::WaitTimeout {
        condition: condition.to_string(),
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::memory::MemoryControlPlane;
    use crate::controlplane::types::{CreateServiceArgs, TaskDefinitionStatus};

    fn create_args(name: &str, count: u32) -> CreateServiceArgs {
        CreateServiceArgs {
            cluster: "default".to_string(),
            service_name: name.to_string(),
            task_definition: "web-task".to_string(),
            desired_count: count,
            role: None,
            load_balancers: None,
            deployment_configuration: None,
        }
    }

    fn describe_count(plane: &MemoryControlPlane) -> usize {
        plane
            .calls()
            .iter()
            .filter(|c| c.operation() == "DescribeServices")
            .count()
    }

    #[test]
    fn test_default_policy_matches_control_plane_waiter() {
        let policy = WaitPolicy::default();
        assert_eq!(policy.poll_interval, Duration::from_secs(15));
        assert_eq!(policy.max_attempts, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reaches_stable_after_settling() {
        let plane = MemoryControlPlane::new().with_settle_polls(3);
        plane.register_task_definition("web-task", 3, TaskDefinitionStatus::Active);
        plane.create_service(&create_args("web", 2)).await.unwrap();

        let service = wait_for(
            &plane,
            "default",
            "web",
            WaitCondition::Stable,
            &WaitPolicy::default(),
        )
        .await
        .unwrap();

        assert!(service.unwrap().is_stable());
        // Settled on the third poll, so the waiter stopped there
        assert_eq!(describe_count(&plane), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_at_attempt_bound() {
        let plane = MemoryControlPlane::new().with_settle_polls(10);
        plane.register_task_definition("web-task", 3, TaskDefinitionStatus::Active);
        plane.create_service(&create_args("web", 2)).await.unwrap();

        let policy = WaitPolicy {
            poll_interval: Duration::from_secs(15),
            max_attempts: 5,
        };
        let err = wait_for(&plane, "default", "web", WaitCondition::Stable, &policy)
            .await
            .unwrap_err();

        match &err {
            Error::WaitTimeout {
                condition,
                attempts,
            } => {
                assert_eq!(condition, "stable");
                assert_eq!(*attempts, 5);
            }
            other => panic!("expected WaitTimeout, got {:?}", other),
        }
        assert!(err.is_indeterminate());
        assert_eq!(describe_count(&plane), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reaches_inactive_through_draining() {
        let plane = MemoryControlPlane::new().with_settle_polls(2);
        plane.register_task_definition("web-task", 3, TaskDefinitionStatus::Active);
        plane.create_service(&create_args("web", 2)).await.unwrap();
        plane.delete_service("default", "web").await.unwrap();

        let service = wait_for(
            &plane,
            "default",
            "web",
            WaitCondition::Inactive,
            &WaitPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(service.unwrap().status, ServiceStatus::Inactive);
        assert_eq!(describe_count(&plane), 2);
    }

    #[tokio::test]
    async fn test_absent_service_satisfies_inactive() {
        let plane = MemoryControlPlane::new();

        let service = wait_for(
            &plane,
            "default",
            "ghost",
            WaitCondition::Inactive,
            &WaitPolicy::default(),
        )
        .await
        .unwrap();

        assert!(service.is_none());
        assert_eq!(describe_count(&plane), 1);
    }

    #[tokio::test]
    async fn test_describe_error_aborts_wait() {
        let plane = MemoryControlPlane::new();
        plane.fail_next_call("DescribeServices", "throttled");

        let err = wait_for(
            &plane,
            "default",
            "web",
            WaitCondition::Stable,
            &WaitPolicy::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::ApiError { .. }));
        assert!(!err.is_indeterminate());
    }
}
