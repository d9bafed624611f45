//! Run configuration
//!
//! Loaded from a TOML file; every section has defaults so a minimal file only
//! lists the controllers, or a conductor that lists them. Credentials never live in the file, they are read
//! from the environment (see [`CONTROLLER_USERNAME_ENV`] and friends).

use crate::error::MigrationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wlm_client::{Credentials, HttpTransportConfig, RetryPolicy};
use wlm_model::{ControllerEndpoint, FirmwareVersion};

/// Environment variable holding the controller username
pub const CONTROLLER_USERNAME_ENV: &str = "WLM_CONTROLLER_USERNAME";
/// Environment variable holding the controller password
pub const CONTROLLER_PASSWORD_ENV: &str = "WLM_CONTROLLER_PASSWORD";
/// Environment variable holding the activation service token
pub const ACTIVATION_TOKEN_ENV: &str = "WLM_ACTIVATION_TOKEN";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Controller entry points
    pub controllers: Vec<ControllerEndpoint>,
    /// Conductor whose switch list supplies the controllers
    pub conductor: Option<ControllerEndpoint>,
    /// Controller HTTP settings
    pub http: HttpConfig,
    /// Retry policy for retryable phases and controller reads
    pub retry: RetryPolicy,
    /// Cutover verification polling
    pub verify: VerifyConfig,
    /// Device model mapping
    pub planning: PlanningConfig,
    /// Activation service
    pub activation: ActivationConfig,
    /// Cutover request options
    pub cutover: CutoverConfig,
    /// Rollback behavior
    pub rollback: RollbackPolicy,
    /// Job ledger persistence
    pub ledger: LedgerConfig,
    /// Minimum controller firmware that supports conversion
    pub min_firmware: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            controllers: Vec::new(),
            conductor: None,
            http: HttpConfig::default(),
            retry: RetryPolicy::default(),
            verify: VerifyConfig::default(),
            planning: PlanningConfig::default(),
            activation: ActivationConfig::default(),
            cutover: CutoverConfig::default(),
            rollback: RollbackPolicy::default(),
            ledger: LedgerConfig::default(),
            min_firmware: "8.10.0.0".to_string(),
        }
    }
}

impl MigrationConfig {
    /// Parse from TOML text and validate
    ///
    /// # Errors
    /// - `Config` on syntax errors or invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, MigrationError> {
        let config: Self =
            toml::from_str(text).map_err(|e| MigrationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    ///
    /// # Errors
    /// - `Config` if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MigrationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MigrationError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check invariants the rest of the engine relies on
    ///
    /// # Errors
    /// - `Config` describing the first problem found
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.controllers.is_empty() && self.conductor.is_none() {
            return Err(MigrationError::Config("no controllers or conductor configured".into()));
        }
        if let Some(conductor) = &self.conductor {
            if conductor.address.trim().is_empty() {
                return Err(MigrationError::Config("conductor has no address".into()));
            }
        }
        let mut seen = BTreeSet::new();
        for endpoint in &self.controllers {
            if endpoint.address.trim().is_empty() {
                return Err(MigrationError::Config(format!(
                    "controller {} has no address",
                    endpoint.id
                )));
            }
            if !seen.insert(&endpoint.id) {
                return Err(MigrationError::Config(format!(
                    "duplicate controller id {}",
                    endpoint.id
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(MigrationError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.verify.timeout_secs == 0 || self.verify.poll_initial_ms == 0 {
            return Err(MigrationError::Config("verify timeouts must be non-zero".into()));
        }
        if self.http.request_timeout_secs == 0 {
            return Err(MigrationError::Config("http.request_timeout_secs must be non-zero".into()));
        }
        if self.planning.default_profile.trim().is_empty() {
            return Err(MigrationError::Config("planning.default_profile is empty".into()));
        }
        self.min_firmware()?;
        Ok(())
    }

    /// Parsed minimum firmware
    ///
    /// # Errors
    /// - `Config` if the version string is malformed
    pub fn min_firmware(&self) -> Result<FirmwareVersion, MigrationError> {
        self.min_firmware
            .parse()
            .map_err(|e| MigrationError::Config(format!("min_firmware: {e}")))
    }

    /// With a controller appended
    #[inline]
    #[must_use]
    pub fn with_controller(mut self, endpoint: ControllerEndpoint) -> Self {
        self.controllers.push(endpoint);
        self
    }

    /// With a conductor to discover controllers from
    #[inline]
    #[must_use]
    pub fn with_conductor(mut self, conductor: ControllerEndpoint) -> Self {
        self.conductor = Some(conductor);
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With verification settings
    #[inline]
    #[must_use]
    pub fn with_verify(mut self, verify: VerifyConfig) -> Self {
        self.verify = verify;
        self
    }

    /// With rollback policy
    #[inline]
    #[must_use]
    pub fn with_rollback(mut self, rollback: RollbackPolicy) -> Self {
        self.rollback = rollback;
        self
    }

    /// With ledger file path
    #[inline]
    #[must_use]
    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger.path = path.into();
        self
    }
}

/// Controller HTTP settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Management port
    pub port: u16,
    /// Per-request timeout (seconds)
    pub request_timeout_secs: u64,
    /// Accept self-signed controller certificates
    pub accept_invalid_certs: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 4343,
            request_timeout_secs: 30,
            accept_invalid_certs: true,
        }
    }
}

impl HttpConfig {
    /// Transport configuration for the controller client
    #[must_use]
    pub fn transport(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            port: self.port,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            accept_invalid_certs: self.accept_invalid_certs,
            ..HttpTransportConfig::default()
        }
    }
}

/// Cutover verification polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Overall deadline (seconds)
    pub timeout_secs: u64,
    /// First poll interval (milliseconds)
    pub poll_initial_ms: u64,
    /// Poll interval cap (milliseconds)
    pub poll_max_ms: u64,
    /// Interval growth per poll
    pub poll_multiplier: f64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 900,
            poll_initial_ms: 5_000,
            poll_max_ms: 60_000,
            poll_multiplier: 1.5,
        }
    }
}

impl VerifyConfig {
    /// Overall deadline
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Interval to wait after `interval`
    #[must_use]
    pub fn next_interval(&self, interval: Duration) -> Duration {
        let next = Duration::from_secs_f64(interval.as_secs_f64() * self.poll_multiplier.max(1.0));
        next.min(Duration::from_millis(self.poll_max_ms.max(self.poll_initial_ms)))
    }

    /// First interval
    #[must_use]
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.poll_initial_ms)
    }
}

/// Device model support and profile mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Profile for models without a specific mapping
    pub default_profile: String,
    /// Model prefix to profile name
    pub model_profiles: BTreeMap<String, String>,
    /// Model prefixes that can be converted
    pub supported_models: Vec<String>,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            default_profile: "default".to_string(),
            model_profiles: BTreeMap::new(),
            supported_models: ["303", "304", "305", "31", "32", "33", "34", "36", "37", "38", "5", "6"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Activation service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Service base URL
    pub base_url: String,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://activate.example.net/api".to_string(),
        }
    }
}

/// Cutover request options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CutoverConfig {
    /// Concurrent image downloads
    pub max_downloads: u32,
    /// Ask the controller to pre-validate devices
    pub pre_validation: bool,
}

impl Default for CutoverConfig {
    fn default() -> Self {
        Self {
            max_downloads: 20,
            pre_validation: false,
        }
    }
}

/// What rollback undoes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackPolicy {
    /// Revoke activation profiles assigned during Provisioning
    pub revoke_profiles: bool,
}

/// Job ledger persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Ledger file
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("wlm-ledger.json"),
        }
    }
}

/// Controller credentials from the environment
///
/// # Errors
/// - `Config` if either variable is unset
pub fn credentials_from_env() -> Result<Credentials, MigrationError> {
    let username = env_var(CONTROLLER_USERNAME_ENV)?;
    let password = env_var(CONTROLLER_PASSWORD_ENV)?;
    Ok(Credentials::new(username, password))
}

/// Activation token from the environment
///
/// # Errors
/// - `Config` if the variable is unset
pub fn activation_token_from_env() -> Result<String, MigrationError> {
    env_var(ACTIVATION_TOKEN_ENV)
}

fn env_var(name: &str) -> Result<String, MigrationError> {
    std::env::var(name).map_err(|_| MigrationError::Config(format!("{name} is not set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[controllers]]
        id = "md-1"
        address = "10.0.0.1"
    "#;

    #[test]
    fn minimal_file_uses_defaults() {
        let config = MigrationConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.controllers.len(), 1);
        assert_eq!(config.http.port, 4343);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.verify.timeout_secs, 900);
        assert_eq!(config.cutover.max_downloads, 20);
        assert!(!config.rollback.revoke_profiles);
        assert_eq!(config.min_firmware().unwrap(), FirmwareVersion::new([8, 10, 0, 0]));
    }

    #[test]
    fn sections_override_defaults() {
        let text = format!(
            "{MINIMAL}\n[rollback]\nrevoke_profiles = true\n[verify]\ntimeout_secs = 60\n\
             [planning.model_profiles]\n\"5\" = \"wifi6\"\n"
        );
        let config = MigrationConfig::from_toml_str(&text).unwrap();
        assert!(config.rollback.revoke_profiles);
        assert_eq!(config.verify.timeout_secs, 60);
        assert_eq!(config.verify.poll_initial_ms, 5_000);
        assert_eq!(config.planning.model_profiles["5"], "wifi6");
    }

    #[test]
    fn rejects_empty_and_duplicate_controllers() {
        assert!(matches!(
            MigrationConfig::from_toml_str(""),
            Err(MigrationError::Config(_))
        ));
        let dup = format!("{MINIMAL}{MINIMAL}");
        let err = MigrationConfig::from_toml_str(&dup).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn conductor_alone_is_enough() {
        let text = "[conductor]\nid = \"mm-1\"\naddress = \"10.0.0.10\"\n";
        let config = MigrationConfig::from_toml_str(text).unwrap();
        assert!(config.controllers.is_empty());
        assert_eq!(config.conductor, Some(ControllerEndpoint::new("mm-1", "10.0.0.10")));

        let blank = MigrationConfig::default().with_conductor(ControllerEndpoint::new("mm-1", " "));
        assert!(blank.validate().is_err());
    }

    #[test]
    fn rejects_zero_attempts() {
        let config = MigrationConfig::default()
            .with_controller(ControllerEndpoint::new("md-1", "10.0.0.1"))
            .with_retry(RetryPolicy::default().with_max_attempts(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn poll_interval_grows_to_cap() {
        let verify = VerifyConfig {
            timeout_secs: 60,
            poll_initial_ms: 1_000,
            poll_max_ms: 2_000,
            poll_multiplier: 1.5,
        };
        let first = verify.initial_interval();
        let second = verify.next_interval(first);
        assert_eq!(second, Duration::from_millis(1_500));
        assert_eq!(verify.next_interval(second), Duration::from_millis(2_000));
    }
}
