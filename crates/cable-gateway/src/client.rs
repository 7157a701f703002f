//! Kernel Gateway control-plane client.

use async_trait::async_trait;
use cable_core::{KernelInfo, ProvisionError, Provisioner};
use reqwest::{Method, RequestBuilder, Response, StatusCode, header::AUTHORIZATION};
use serde_json::json;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Client construction error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid gateway url: {0}")]
    InvalidUrl(String),
}

/// REST client for a Jupyter Kernel Gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl GatewayClient {
    /// Create a client for the gateway at `endpoint`.
    ///
    /// WebSocket schemes are accepted and mapped to their HTTP equivalents.
    ///
    /// # Errors
    /// Returns error if the endpoint has no host or an unsupported scheme.
    pub fn new(endpoint: &Url) -> Result<Self, GatewayError> {
        let scheme = match endpoint.scheme() {
            "http" | "ws" => "http",
            "https" | "wss" => "https",
            other => return Err(GatewayError::InvalidUrl(format!("unsupported scheme {other:?}"))),
        };
        if endpoint.host_str().is_none_or(str::is_empty) {
            return Err(GatewayError::InvalidUrl(format!("{endpoint} has no host")));
        }
        let mut base = endpoint.clone();
        base.set_scheme(scheme)
            .map_err(|()| GatewayError::InvalidUrl(endpoint.to_string()))?;
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token: None,
        })
    }

    /// Authenticate with a gateway token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Use a preconfigured HTTP client (timeouts, proxies, TLS).
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Gateway base URL.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.base
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut url = self.base.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}{path}"));

        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, format!("token {token}")),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ProvisionError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ProvisionError::Request(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProvisionError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_for_kernel(&self, builder: RequestBuilder, id: Uuid) -> Result<(), ProvisionError> {
        match self.send(builder).await {
            Ok(_) => Ok(()),
            Err(ProvisionError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(ProvisionError::NotFound(id))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Provisioner for GatewayClient {
    async fn create_kernel(&self, name: &str) -> Result<KernelInfo, ProvisionError> {
        let builder = self
            .request(Method::POST, "/api/kernels")
            .json(&json!({ "name": name }));
        let kernel: KernelInfo = self
            .send(builder)
            .await?
            .json()
            .await
            .map_err(|e| ProvisionError::InvalidResponse(e.to_string()))?;
        tracing::info!("Created {} kernel {}", kernel.name, kernel.id);
        Ok(kernel)
    }

    async fn list_kernels(&self) -> Result<Vec<KernelInfo>, ProvisionError> {
        let builder = self.request(Method::GET, "/api/kernels");
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| ProvisionError::InvalidResponse(e.to_string()))
    }

    async fn interrupt_kernel(&self, id: Uuid) -> Result<(), ProvisionError> {
        let builder = self.request(Method::POST, &format!("/api/kernels/{id}/interrupt"));
        self.send_for_kernel(builder, id).await?;
        tracing::debug!("Interrupted kernel {id}");
        Ok(())
    }

    async fn delete_kernel(&self, id: Uuid) -> Result<(), ProvisionError> {
        let builder = self.request(Method::DELETE, &format!("/api/kernels/{id}"));
        self.send_for_kernel(builder, id).await?;
        tracing::info!("Deleted kernel {id}");
        Ok(())
    }
}
