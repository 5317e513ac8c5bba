//! Application configuration options

use std::collections::BTreeMap;
use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::poller;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Controller base URL of this target
    pub server_url: String,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Content store remote configuration
    pub content: ContentOptions,

    /// Wait for a start notification when a chunk sets no timeout
    pub notify_timeout: Duration,

    /// Attributes sent on identify
    pub attributes: BTreeMap<String, String>,

    /// Poller worker options
    pub poller: poller::Options,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, attributes: BTreeMap<String, String>) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            server_url: settings.server.base_url(),
            layout: settings.paths.clone(),
            content: ContentOptions {
                os_remote: settings.ostree.remote_name.clone(),
                remote_url: settings.ostree.remote_url(&settings.server.host),
                gpg_verify: settings.ostree.gpg_verify,
            },
            notify_timeout: Duration::from_secs(settings.notify.default_timeout_secs),
            attributes,
            poller: poller::Options {
                retry_delay: Duration::from_secs(settings.polling.retry_delay_secs),
            },
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,

    /// Time left to start notification sessions at shutdown
    pub notify_drain_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
            notify_drain_delay: Duration::from_secs(20),
        }
    }
}

/// Content store remote options
#[derive(Debug, Clone)]
pub struct ContentOptions {
    /// Name of the OS remote
    pub os_remote: String,

    /// URL shared by the OS and container remotes
    pub remote_url: String,

    pub gpg_verify: bool,
}
