//! Agent settings

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Update agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Management server base URL, without a trailing slash
    #[serde(default = "default_host")]
    pub host: String,

    /// Tenant token for multi-tenant servers
    #[serde(default)]
    pub tenant_token: Option<String>,

    /// Device type reported during negotiation
    pub device_type: String,

    /// Name of the currently installed artifact
    pub artifact_name: String,

    /// Seconds between authentication attempts
    #[serde(default = "default_authentication_poll_interval")]
    pub authentication_poll_interval_secs: u64,

    /// Seconds between deployment checks once authenticated
    #[serde(default = "default_update_poll_interval")]
    pub update_poll_interval_secs: u64,

    /// Transport receive buffer length, sizes the decode working buffer
    #[serde(default = "default_recv_buf_length")]
    pub recv_buf_length: usize,

    /// Send stored provides metadata with v2 deployment negotiation
    #[serde(default = "default_true")]
    pub provides_depends: bool,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_host() -> String {
    "https://updates.example.io".to_string()
}

fn default_authentication_poll_interval() -> u64 {
    600
}

fn default_update_poll_interval() -> u64 {
    1800
}

fn default_recv_buf_length() -> usize {
    crate::artifact::DEFAULT_RECV_BUF_LENGTH
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Settings for `device_type` running `artifact_name`, with defaults
    /// for everything else
    pub fn new(device_type: impl Into<String>, artifact_name: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            tenant_token: None,
            device_type: device_type.into(),
            artifact_name: artifact_name.into(),
            authentication_poll_interval_secs: default_authentication_poll_interval(),
            update_poll_interval_secs: default_update_poll_interval(),
            recv_buf_length: default_recv_buf_length(),
            provides_depends: true,
            log_level: LogLevel::Info,
        }
    }
}
