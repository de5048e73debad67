//! JSON-over-HTTP adapter for the control plane
//!
//! One action per call: `POST {endpoint}/v1/<Action>` with a camelCase
//! JSON body. Non-2xx responses surface as [`Error::ApiError`] carrying
//! the action name and whatever message the control plane returned.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::controlplane::api::ControlPlane;
use crate::controlplane::types::{CreateServiceArgs, Service, TaskDefinition, UpdateServiceArgs};
use crate::error::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP control-plane client
///
/// Credential discovery happens elsewhere; this client only attaches an
/// already-resolved bearer token when one is provided.
#[derive(Clone)]
pub struct HttpControlPlane {
    client: Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpControlPlane {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(concat!("converge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    /// Attach a bearer token to every request
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    async fn post<B, T>(&self, operation: &'static str, body: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = format!("{}/v1/{}", self.endpoint, operation);
        debug!("POST {}", url);

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|source| Error::TransportError { operation, source })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.message)
                .unwrap_or_else(|_| {
                    if text.is_empty() {
                        status.to_string()
                    } else {
                        text
                    }
                });
            return Err(Error::ApiError { operation, message });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| Error::TransportError { operation, source })
    }
}

/// Error payload shape used by the control plane
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeServicesRequest<'a> {
    cluster: &'a str,
    services: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeServicesResponse {
    #[serde(default)]
    services: Vec<Service>,
    #[serde(default)]
    failures: Vec<DescribeFailure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeFailure {
    #[serde(default)]
    arn: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeTaskDefinitionRequest<'a> {
    task_definition: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDefinitionEnvelope {
    task_definition: TaskDefinition,
}

#[derive(Debug, Deserialize)]
struct ServiceEnvelope {
    service: Service,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteServiceRequest<'a> {
    cluster: &'a str,
    service: &'a str,
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn describe_service(&self, cluster: &str, service: &str) -> Result<Option<Service>> {
        let request = DescribeServicesRequest {
            cluster,
            services: vec![service],
        };
        let response: DescribeServicesResponse =
            self.post("DescribeServices", &request).await?;

        if let Some(found) = response
            .services
            .into_iter()
            .find(|s| s.service_name == service || s.service_arn.as_deref() == Some(service))
        {
            return Ok(Some(found));
        }

        for failure in &response.failures {
            debug!(
                "describe failure for {:?}: {}",
                failure.arn,
                failure.reason.as_deref().unwrap_or("unknown")
            );
        }

        // Empty result and an explicit MISSING failure mean the same thing
        Ok(None)
    }

    async fn describe_task_definition(&self, reference: &str) -> Result<TaskDefinition> {
        let request = DescribeTaskDefinitionRequest {
            task_definition: reference,
        };
        let envelope: TaskDefinitionEnvelope =
            self.post("DescribeTaskDefinition", &request).await?;
        Ok(envelope.task_definition)
    }

    async fn create_service(&self, args: &CreateServiceArgs) -> Result<Service> {
        let envelope: ServiceEnvelope = self.post("CreateService", args).await?;
        Ok(envelope.service)
    }

    async fn update_service(&self, args: &UpdateServiceArgs) -> Result<Service> {
        let envelope: ServiceEnvelope = self.post("UpdateService", args).await?;
        Ok(envelope.service)
    }

    async fn delete_service(&self, cluster: &str, service: &str) -> Result<()> {
        let request = DeleteServiceRequest { cluster, service };
        // The response echoes the service in its new DRAINING state; the
        // reconciler re-describes instead of trusting the echo.
        let _: serde_json::Value = self.post("DeleteService", &request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service_json(name: &str, status: &str) -> serde_json::Value {
        json!({
            "serviceArn": format!("svc/default/{}", name),
            "serviceName": name,
            "status": status,
            "taskDefinition": "taskdef/web-task:3",
            "desiredCount": 2,
            "runningCount": 2,
            "pendingCount": 0,
            "deployments": [{"id": "rollout-1", "status": "PRIMARY"}],
            "createdAt": 1693526400.0
        })
    }

    #[tokio::test]
    async fn test_describe_service_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/DescribeServices"))
            .and(body_json(json!({
                "cluster": "default",
                "services": ["web"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "services": [service_json("web", "ACTIVE")],
                "failures": []
            })))
            .mount(&server)
            .await;

        let plane = HttpControlPlane::new(server.uri()).unwrap();
        let service = plane.describe_service("default", "web").await.unwrap();

        let service = service.expect("service should be found");
        assert_eq!(service.service_name, "web");
        assert!(service.status.is_active());
        // Epoch timestamp from the wire is normalized on re-serialization
        let rendered = serde_json::to_value(&service).unwrap();
        assert_eq!(rendered["createdAt"], "2023-09-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_describe_service_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/DescribeServices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "services": [],
                "failures": [{"arn": "svc/default/web", "reason": "MISSING"}]
            })))
            .mount(&server)
            .await;

        let plane = HttpControlPlane::new(server.uri()).unwrap();
        let service = plane.describe_service("default", "web").await.unwrap();
        assert!(service.is_none());
    }

    #[tokio::test]
    async fn test_create_service_sends_exact_payload() {
        let server = MockServer::start().await;
        // The matcher is exact: an extra or missing key fails the test
        Mock::given(method("POST"))
            .and(path("/v1/CreateService"))
            .and(body_json(json!({
                "cluster": "default",
                "serviceName": "web",
                "taskDefinition": "web-task",
                "desiredCount": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "service": service_json("web", "ACTIVE")
            })))
            .mount(&server)
            .await;

        let plane = HttpControlPlane::new(server.uri()).unwrap();
        let args = CreateServiceArgs {
            cluster: "default".to_string(),
            service_name: "web".to_string(),
            task_definition: "web-task".to_string(),
            desired_count: 2,
            role: None,
            load_balancers: None,
            deployment_configuration: None,
        };
        let service = plane.create_service(&args).await.unwrap();
        assert_eq!(service.service_name, "web");
    }

    #[tokio::test]
    async fn test_update_service_sends_only_supplied_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/UpdateService"))
            .and(body_json(json!({
                "cluster": "default",
                "service": "web",
                "desiredCount": 0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "service": service_json("web", "ACTIVE")
            })))
            .mount(&server)
            .await;

        let plane = HttpControlPlane::new(server.uri()).unwrap();
        let args = UpdateServiceArgs {
            cluster: "default".to_string(),
            service: "web".to_string(),
            task_definition: None,
            desired_count: Some(0),
            deployment_configuration: None,
        };
        plane.update_service(&args).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_carries_operation_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/CreateService"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"message": "service limit exceeded"})),
            )
            .mount(&server)
            .await;

        let plane = HttpControlPlane::new(server.uri()).unwrap();
        let args = CreateServiceArgs {
            cluster: "default".to_string(),
            service_name: "web".to_string(),
            task_definition: "web-task".to_string(),
            desired_count: 2,
            role: None,
            load_balancers: None,
            deployment_configuration: None,
        };

        match plane.create_service(&args).await {
            Err(Error::ApiError { operation, message }) => {
                assert_eq!(operation, "CreateService");
                assert_eq!(message, "service limit exceeded");
            }
            other => panic!("expected ApiError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bearer_token_attached() {
        let server = MockServer::start().await;
        // Only matches when the Authorization header is present
        Mock::given(method("POST"))
            .and(path("/v1/DescribeServices"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "services": [],
                "failures": []
            })))
            .mount(&server)
            .await;

        let plane = HttpControlPlane::new(server.uri())
            .unwrap()
            .with_auth_token("secret-token");
        let service = plane.describe_service("default", "web").await.unwrap();
        assert!(service.is_none());
    }

    #[tokio::test]
    async fn test_describe_task_definition() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/DescribeTaskDefinition"))
            .and(body_json(json!({"taskDefinition": "web-task:3"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "taskDefinition": {
                    "taskDefinitionArn": "taskdef/web-task:3",
                    "family": "web-task",
                    "revision": 3,
                    "status": "ACTIVE"
                }
            })))
            .mount(&server)
            .await;

        let plane = HttpControlPlane::new(server.uri()).unwrap();
        let td = plane.describe_task_definition("web-task:3").await.unwrap();
        assert_eq!(td.task_definition_arn, "taskdef/web-task:3");
        assert!(td.status.is_active());
    }

    #[tokio::test]
    async fn test_transport_error_is_not_indeterminate() {
        // Nothing listens on port 1
        let plane = HttpControlPlane::new("http://localhost:1").unwrap();
        let err = plane.describe_service("default", "web").await.unwrap_err();
        match &err {
            Error::TransportError { operation, .. } => {
                assert_eq!(*operation, "DescribeServices")
            }
            other => panic!("expected TransportError, got {:?}", other),
        }
        assert!(!err.is_indeterminate());
    }
}
