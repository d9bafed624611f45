//! Device activation service client
//!
//! Both operations are idempotent: asking twice whether a device is enrolled,
//! or assigning the same profile twice, leaves the service in the same state.

use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use wlm_model::{ActivationRecord, EnrollmentStatus, Serial};

/// Activation/provisioning service operations
#[async_trait]
pub trait ActivationService: Send + Sync {
    /// Whether the device is enrolled
    async fn is_enrolled(&self, serial: &Serial) -> ApiResult<bool>;

    /// Assign a management profile (idempotent)
    async fn assign_profile(&self, serial: &Serial, profile: &str) -> ApiResult<ActivationRecord>;

    /// Remove any assigned profile (idempotent)
    async fn revoke_profile(&self, serial: &Serial) -> ApiResult<()>;
}

#[derive(Debug, Deserialize)]
struct DeviceBody {
    #[serde(default)]
    enrolled: bool,
    #[serde(default)]
    profile: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProfileBody<'a> {
    profile: &'a str,
}

/// reqwest-backed activation client
#[derive(Debug, Clone)]
pub struct HttpActivationClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpActivationClient {
    /// Build client
    ///
    /// # Errors
    /// - `ApiError::Transport` if the HTTP client cannot be constructed
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn device_url(&self, serial: &Serial) -> String {
        format!("{}/v1/devices/{}", self.base_url, serial)
    }

    async fn check(response: reqwest::Response) -> ApiResult<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(format!("activation service ({status})")));
        }
        if !status.is_success() {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ActivationService for HttpActivationClient {
    async fn is_enrolled(&self, serial: &Serial) -> ApiResult<bool> {
        let response = self
            .client
            .get(self.device_url(serial))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body: DeviceBody = Self::check(response).await?.json().await?;
        debug!(serial = %serial, enrolled = body.enrolled, "enrollment checked");
        Ok(body.enrolled)
    }

    async fn assign_profile(&self, serial: &Serial, profile: &str) -> ApiResult<ActivationRecord> {
        let response = self
            .client
            .put(format!("{}/profile", self.device_url(serial)))
            .bearer_auth(&self.token)
            .json(&ProfileBody { profile })
            .send()
            .await?;
        let body: DeviceBody = Self::check(response).await?.json().await?;
        Ok(ActivationRecord {
            serial: serial.clone(),
            enrollment: if body.enrolled {
                EnrollmentStatus::Enrolled
            } else {
                EnrollmentStatus::NotEnrolled
            },
            profile: body.profile.or_else(|| Some(profile.to_string())),
        })
    }

    async fn revoke_profile(&self, serial: &Serial) -> ApiResult<()> {
        let response = self
            .client
            .delete(format!("{}/profile", self.device_url(serial)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }
}
