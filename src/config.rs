//! Configuration management for the LingVis bridge

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, Result};

/// Learning language assumed for publications that declare none
pub const DEFAULT_LANGUAGE: &str = "sv";
/// Delay before the first discovery scan
pub const DEFAULT_DISCOVERY_DELAY_MS: u64 = 200;
/// Interval between discovery scans
pub const DEFAULT_DISCOVERY_PERIOD_MS: u64 = 1000;
/// Per-call deadline; 0 disables it
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub app: AppRegistration,
    pub timing: TimingConfig,
    pub default_language: String,
}

/// Identity the host application registers with the script side
#[derive(Debug, Clone, Deserialize)]
pub struct AppRegistration {
    pub app_id: String,
    /// Free-form client metadata (version, app name, platform)
    pub client_data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Deadline for an outbound call; `None` waits indefinitely
    pub call_timeout: Option<Duration>,
    /// Bound on how long a deferred readiness handshake waits for the gate
    pub ready_timeout: Option<Duration>,
    pub discovery_delay: Duration,
    pub discovery_period: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            app: AppRegistration {
                app_id: "unknown".to_string(),
                client_data: String::new(),
            },
            timing: TimingConfig::default(),
            default_language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            call_timeout: Some(Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS)),
            ready_timeout: None,
            discovery_delay: Duration::from_millis(DEFAULT_DISCOVERY_DELAY_MS),
            discovery_period: Duration::from_millis(DEFAULT_DISCOVERY_PERIOD_MS),
        }
    }
}

impl BridgeConfig {
    /// Build a configuration for the given app registration
    pub fn new(app_id: impl Into<String>, client_data: impl Into<String>) -> Self {
        BridgeConfig {
            app: AppRegistration {
                app_id: app_id.into(),
                client_data: client_data.into(),
            },
            ..Default::default()
        }
    }

    pub fn from_env() -> Result<Self> {
        let app_id = env::var("LINGVIS_APP_ID")
            .map_err(|e| BridgeError::Config(format!("LINGVIS_APP_ID: {}", e)))?;

        Ok(BridgeConfig {
            app: AppRegistration {
                app_id,
                client_data: env::var("LINGVIS_CLIENT_DATA").unwrap_or_default(),
            },
            timing: TimingConfig {
                call_timeout: optional_secs(
                    "LINGVIS_CALL_TIMEOUT_SECS",
                    DEFAULT_CALL_TIMEOUT_SECS,
                )?,
                ready_timeout: optional_secs("LINGVIS_READY_TIMEOUT_SECS", 0)?,
                discovery_delay: Duration::from_millis(parse_var(
                    "LINGVIS_DISCOVERY_DELAY_MS",
                    DEFAULT_DISCOVERY_DELAY_MS,
                )?),
                discovery_period: Duration::from_millis(parse_var(
                    "LINGVIS_DISCOVERY_PERIOD_MS",
                    DEFAULT_DISCOVERY_PERIOD_MS,
                )?),
            },
            default_language: env::var("LINGVIS_DEFAULT_LANGUAGE")
                .unwrap_or_else(|_| DEFAULT_LANGUAGE.to_string()),
        })
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timing.call_timeout = timeout;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timing.ready_timeout = timeout;
        self
    }
}

fn parse_var(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BridgeError::Config(format!("{} is not a number: {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}

/// Seconds from the environment, where 0 means "no deadline"
fn optional_secs(name: &str, default: u64) -> Result<Option<Duration>> {
    let secs = parse_var(name, default)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
