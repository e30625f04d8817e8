//! Configuration for VM lifecycle operations
//!
//! Loaded from defaults, an optional `config/vm-lifecycle` file and
//! `VM_LIFECYCLE__*` environment variables, in that order.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, LifecycleResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default)]
    pub xapi: XapiConfig,
    #[serde(default)]
    pub quiesce: QuiesceConfig,
    #[serde(default)]
    pub reclaim: ReclaimConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection to the pool master.
#[derive(Clone, Serialize, Deserialize)]
pub struct XapiConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Accept self-signed pool certificates
    #[serde(default = "default_true")]
    pub allow_unauthorized: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_originator")]
    pub originator: String,
}

impl std::fmt::Debug for XapiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XapiConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("allow_unauthorized", &self.allow_unauthorized)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("originator", &self.originator)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuiesceConfig {
    /// VMs carrying this tag are never quiesced
    #[serde(default = "default_opt_out_tag")]
    pub opt_out_tag: String,
    /// Tag added to snapshots that were successfully quiesced
    #[serde(default = "default_success_tag")]
    pub success_tag: String,
    #[serde(default = "default_quiesce_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_quiesce_delay")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimConfig {
    /// Wait between two safety checks of a still-attached disk
    #[serde(default = "default_poll_delay")]
    pub poll_delay_secs: u64,
    /// Number of safety checks before giving up; unbounded when unset
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_true() -> bool {
    true
}
fn default_username() -> String {
    "root".to_string()
}
fn default_request_timeout() -> u64 {
    60
}
fn default_originator() -> String {
    "vm-lifecycle".to_string()
}
fn default_opt_out_tag() -> String {
    "xo-disable-quiesce".to_string()
}
fn default_success_tag() -> String {
    "quiesce".to_string()
}
fn default_quiesce_attempts() -> u32 {
    3
}
fn default_quiesce_delay() -> u64 {
    60
}
fn default_poll_delay() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for XapiConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: default_username(),
            password: String::new(),
            allow_unauthorized: default_true(),
            request_timeout_secs: default_request_timeout(),
            originator: default_originator(),
        }
    }
}

impl Default for QuiesceConfig {
    fn default() -> Self {
        Self {
            opt_out_tag: default_opt_out_tag(),
            success_tag: default_success_tag(),
            max_attempts: default_quiesce_attempts(),
            retry_delay_secs: default_quiesce_delay(),
        }
    }
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            poll_delay_secs: default_poll_delay(),
            max_attempts: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl QuiesceConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl ReclaimConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_secs(self.poll_delay_secs)
    }
}

impl XapiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl LifecycleConfig {
    /// Load and validate configuration.
    ///
    /// `file` overrides the default `config/vm-lifecycle` location.
    pub fn load(file: Option<&str>) -> LifecycleResult<Self> {
        let _ = dotenvy::dotenv();

        let config = ::config::Config::builder()
            .add_source(
                ::config::File::with_name(file.unwrap_or("config/vm-lifecycle"))
                    .required(file.is_some()),
            )
            .add_source(
                ::config::Environment::with_prefix("VM_LIFECYCLE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: LifecycleConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LifecycleResult<()> {
        if self.quiesce.max_attempts == 0 {
            return Err(LifecycleError::ConfigurationError(
                "quiesce.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.reclaim.max_attempts == Some(0) {
            return Err(LifecycleError::ConfigurationError(
                "reclaim.max_attempts must be at least 1 when set".to_string(),
            ));
        }
        if !self.xapi.url.is_empty() && !self.xapi.url.starts_with("http") {
            return Err(LifecycleError::ConfigurationError(format!(
                "xapi.url must be an http(s) URL, got '{}'",
                self.xapi.url
            )));
        }
        Ok(())
    }
}
