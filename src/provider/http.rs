//! JSON-over-HTTP client for an external provisioning gateway.
//!
//! | Operation | Request                        | Response                      |
//! |-----------|--------------------------------|-------------------------------|
//! | create    | `POST /resources`              | `{provider_id, attributes}`   |
//! | update    | `PUT /resources/{id}`          | `{attributes}`                |
//! | delete    | `DELETE /resources/{id}`       | empty                         |
//! | read      | `GET /resources/{id}`          | `{provider_id, attributes}`   |

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ProviderError, Result};
use crate::model::{ResolvedProperties, ResourceKind};

use super::api::{Attributes, ProvisionedResource, ResourceProvider};

/// Environment variable holding the gateway bearer token.
pub const TOKEN_ENV_VAR: &str = "STACKPLAN_PROVIDER_TOKEN";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Retry delay reported when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// HTTP provisioning gateway client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    kind: ResourceKind,
    properties: &'a ResolvedProperties,
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    #[serde(default)]
    attributes: Attributes,
}

impl HttpProvider {
    /// Creates a client for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Creates a client taking the bearer token from [`TOKEN_ENV_VAR`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_env(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        let token = std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty());
        if token.is_none() {
            debug!("{TOKEN_ENV_VAR} not set, calling gateway without credentials");
        }
        Self::new(endpoint, token, timeout_secs)
    }

    fn url(&self, provider_id: Option<&str>) -> String {
        provider_id.map_or_else(
            || format!("{}/resources", self.endpoint),
            |id| format!("{}/resources/{id}", self.endpoint),
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");

        match &self.token {
            Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("Request failed: {e}")))?;

        trace!(status = %response.status(), url = %response.url(), "Gateway response");
        Ok(response)
    }

    async fn parse<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T> {
        response.json().await.map_err(|e| {
            ProviderError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            }
            .into()
        })
    }
}

/// Maps a non-success status to a provider error.
async fn status_error(response: Response, provider_id: Option<&str>) -> ProviderError {
    let status = response.status();

    match (status, provider_id) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => ProviderError::AuthenticationFailed {
            message: format!("Gateway returned {status}; check {TOKEN_ENV_VAR}"),
        },
        (StatusCode::TOO_MANY_REQUESTS, _) => {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|&secs| secs > 0)
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            ProviderError::RateLimited { retry_after_secs }
        }
        (StatusCode::NOT_FOUND, Some(id)) => ProviderError::NotFound {
            provider_id: id.to_string(),
        },
        _ => {
            let body = response.text().await.unwrap_or_default();
            ProviderError::request(status.as_u16(), body)
        }
    }
}

#[async_trait]
impl ResourceProvider for HttpProvider {
    async fn create_resource(
        &self,
        kind: ResourceKind,
        properties: &ResolvedProperties,
    ) -> Result<ProvisionedResource> {
        let url = self.url(None);
        debug!("POST {url} ({kind})");

        let response = self
            .send(
                self.request(reqwest::Method::POST, &url)
                    .json(&ResourceRequest { kind, properties }),
            )
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response, None).await.into());
        }
        Self::parse(response).await
    }

    async fn update_resource(
        &self,
        provider_id: &str,
        kind: ResourceKind,
        properties: &ResolvedProperties,
    ) -> Result<Attributes> {
        let url = self.url(Some(provider_id));
        debug!("PUT {url} ({kind})");

        let response = self
            .send(
                self.request(reqwest::Method::PUT, &url)
                    .json(&ResourceRequest { kind, properties }),
            )
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response, Some(provider_id)).await.into());
        }
        let body: UpdateResponse = Self::parse(response).await?;
        Ok(body.attributes)
    }

    async fn delete_resource(&self, provider_id: &str) -> Result<()> {
        let url = self.url(Some(provider_id));
        debug!("DELETE {url}");

        let response = self
            .send(self.request(reqwest::Method::DELETE, &url))
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response, Some(provider_id)).await.into());
        }
        Ok(())
    }

    async fn read_resource(&self, provider_id: &str) -> Result<Option<ProvisionedResource>> {
        let url = self.url(Some(provider_id));
        debug!("GET {url}");

        let response = self.send(self.request(reqwest::Method::GET, &url)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response, Some(provider_id)).await.into());
        }
        Self::parse(response).await.map(Some)
    }

    fn provider_type(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackError;
    use serde_json::json;
    use wiremock::matchers::{body_json, header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(&server.uri(), Some(String::from("secret")), 5).unwrap()
    }

    fn role_properties() -> ResolvedProperties {
        let mut properties = ResolvedProperties::new();
        properties.insert(String::from("role_name"), json!("AppRole"));
        properties
    }

    #[tokio::test]
    async fn test_create_posts_kind_and_properties() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resources"))
            .and(header_is("authorization", "Bearer secret"))
            .and(body_json(json!({
                "kind": "role",
                "properties": {"role_name": "AppRole"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "provider_id": "role-1",
                "attributes": {"id": "role-1", "arn": "arn:aws:iam::1:role/AppRole"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = provider(&server)
            .create_resource(ResourceKind::Role, &role_properties())
            .await
            .unwrap();

        assert_eq!(created.provider_id, "role-1");
        assert_eq!(created.attributes["arn"], "arn:aws:iam::1:role/AppRole");
    }

    #[tokio::test]
    async fn test_update_returns_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/resources/role-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"attributes": {"id": "role-1", "name": "AppRole"}})),
            )
            .mount(&server)
            .await;

        let attributes = provider(&server)
            .update_resource("role-1", ResourceKind::Role, &role_properties())
            .await
            .unwrap();

        assert_eq!(attributes["name"], "AppRole");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/resources/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/resources/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/resources/denied"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/resources/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let provider = provider(&server);

        let err = provider.delete_resource("gone").await.unwrap_err();
        assert!(matches!(err, StackError::Provider(ProviderError::NotFound { .. })));

        let err = provider.delete_resource("busy").await.unwrap_err();
        assert!(matches!(
            err,
            StackError::Provider(ProviderError::RateLimited { retry_after_secs: 7 })
        ));
        assert!(err.is_retryable());

        let err = provider.delete_resource("denied").await.unwrap_err();
        assert!(matches!(
            err,
            StackError::Provider(ProviderError::AuthenticationFailed { .. })
        ));

        let err = provider.delete_resource("broken").await.unwrap_err();
        assert!(matches!(
            err,
            StackError::Provider(ProviderError::RequestFailed { status: 500, ref message }) if message == "boom"
        ));
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/lb-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let read = provider(&server).read_resource("lb-1").await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_network_error() {
        let provider = HttpProvider::new("http://127.0.0.1:9", None, 1).unwrap();
        let err = provider.read_resource("x").await.unwrap_err();

        assert!(matches!(
            err,
            StackError::Provider(ProviderError::NetworkError { .. })
        ));
    }
}
