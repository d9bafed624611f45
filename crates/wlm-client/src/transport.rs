//! Raw controller transport
//!
//! One request in, one JSON document out. Sessions, retry and
//! serialization live in [`crate::controller::ControllerAdapter`]; a
//! transport only knows how to speak the controller's REST dialect.

use crate::error::{ApiError, ApiResult};
use crate::session::{Credentials, Session};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use wlm_model::ControllerEndpoint;

/// A single controller request
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerRequest {
    /// Read-only CLI show command
    Show(String),
    /// Configuration object write
    Configure {
        /// Object name
        object: String,
        /// Object body
        body: Value,
    },
}

impl ControllerRequest {
    /// Show command request
    #[inline]
    #[must_use]
    pub fn show(command: impl Into<String>) -> Self {
        Self::Show(command.into())
    }

    /// True if the request changes controller state
    #[inline]
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Configure { .. })
    }

    /// Short label for logs
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Show(command) => command,
            Self::Configure { object, .. } => object,
        }
    }
}

/// Executes requests against a controller
#[async_trait]
pub trait ControllerTransport: Send + Sync {
    /// Open a session
    async fn login(
        &self,
        endpoint: &ControllerEndpoint,
        credentials: &Credentials,
    ) -> ApiResult<Session>;

    /// Execute one request within a session
    async fn execute(
        &self,
        endpoint: &ControllerEndpoint,
        session: &Session,
        request: &ControllerRequest,
    ) -> ApiResult<Value>;
}

/// HTTP transport settings
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// HTTPS management port
    pub port: u16,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Accept self-signed controller certificates
    pub accept_invalid_certs: bool,
    /// Configuration node path for object writes
    pub config_path: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            port: 4343,
            request_timeout: Duration::from_secs(30),
            accept_invalid_certs: true,
            config_path: "/md".to_string(),
        }
    }
}

/// reqwest-backed controller transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Build transport
    ///
    /// # Errors
    /// - `ApiError::Transport` if the HTTP client cannot be constructed
    pub fn new(config: HttpTransportConfig) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn base_url(&self, endpoint: &ControllerEndpoint) -> String {
        format!("https://{}:{}/v1", endpoint.address, self.config.port)
    }
}

#[async_trait]
impl ControllerTransport for HttpTransport {
    async fn login(
        &self,
        endpoint: &ControllerEndpoint,
        credentials: &Credentials,
    ) -> ApiResult<Session> {
        let url = format!("{}/api/login", self.base_url(endpoint));
        let response = self
            .client
            .post(&url)
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(format!(
                "{} refused login ({status})",
                endpoint.id
            )));
        }
        if !status.is_success() {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response.json().await?;
        crate::parse::parse_login(&body)
    }

    async fn execute(
        &self,
        endpoint: &ControllerEndpoint,
        session: &Session,
        request: &ControllerRequest,
    ) -> ApiResult<Value> {
        debug!(controller = %endpoint.id, request = request.label(), "controller request");

        let builder = match request {
            ControllerRequest::Show(command) => self
                .client
                .get(format!("{}/configuration/showcommand", self.base_url(endpoint)))
                .query(&[("command", command.as_str()), ("UIDARUBA", session.uid.as_str())]),
            ControllerRequest::Configure { object, body } => self
                .client
                .post(format!(
                    "{}/configuration/object/{object}",
                    self.base_url(endpoint)
                ))
                .query(&[
                    ("config_path", self.config.config_path.as_str()),
                    ("UIDARUBA", session.uid.as_str()),
                ])
                .json(body),
        };
        let builder = match &session.csrf_token {
            Some(token) => builder.header("X-CSRF-Token", token),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::SessionExpired);
        }
        if !status.is_success() {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response.json().await?;
        if request.is_mutating() {
            crate::parse::check_global_result(&body)?;
        }
        Ok(body)
    }
}
