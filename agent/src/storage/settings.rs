//! Settings file management

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;
use crate::storage::layout::StorageLayout;

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Update server configuration
    pub server: ServerSettings,

    /// Content store remote configuration
    #[serde(default)]
    pub ostree: OstreeSettings,

    /// Polling behaviour
    #[serde(default)]
    pub polling: PollingSettings,

    /// Container start notification behaviour
    #[serde(default)]
    pub notify: NotifySettings,

    /// Extra attributes sent when the server asks the target to identify
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Filesystem layout overrides
    #[serde(default)]
    pub paths: StorageLayout,
}

/// Update server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Server host name
    pub host: String,

    /// Server port
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Use HTTPS
    #[serde(default)]
    pub ssl: bool,

    /// Tenant the target belongs to
    #[serde(default = "default_tenant")]
    pub tenant_id: String,

    /// Controller id of this target
    pub target_name: String,

    /// Target security token
    pub auth_token: String,
}

fn default_server_port() -> u16 {
    8080
}

fn default_tenant() -> String {
    "DEFAULT".to_string()
}

impl ServerSettings {
    /// Controller base URL of this target
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!(
            "{}://{}:{}/{}/controller/v1/{}",
            scheme, self.host, self.port, self.tenant_id, self.target_name
        )
    }
}

/// Content store remote settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OstreeSettings {
    /// Remote name of the OS repository
    #[serde(default = "default_remote_name")]
    pub remote_name: String,

    /// Verify GPG signatures of pulled commits
    #[serde(default)]
    pub gpg_verify: bool,

    /// Use HTTPS for the remote
    #[serde(default)]
    pub ssl: bool,

    /// Port of the remote on the server host
    #[serde(default = "default_ostree_port")]
    pub port: u16,
}

fn default_remote_name() -> String {
    "fullmetalupdate".to_string()
}

fn default_ostree_port() -> u16 {
    8000
}

impl Default for OstreeSettings {
    fn default() -> Self {
        Self {
            remote_name: default_remote_name(),
            gpg_verify: false,
            ssl: false,
            port: default_ostree_port(),
        }
    }
}

impl OstreeSettings {
    /// Remote URL, served from the same host as the update server
    pub fn remote_url(&self, host: &str) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, host, self.port)
    }
}

/// Polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Delay before polling again after a failed poll
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_retry_delay() -> u64 {
    60
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay(),
        }
    }
}

/// Start notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySettings {
    /// Wait used when a chunk does not carry a `timeout`
    #[serde(default = "default_notify_timeout")]
    pub default_timeout_secs: u64,
}

fn default_notify_timeout() -> u64 {
    300
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_notify_timeout(),
        }
    }
}
