//! Application state management

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{error, info, warn};

use crate::app::options::AppOptions;
use crate::deploy::container::ContainerUpdater;
use crate::deploy::notify::{feedback_channel, FeedbackBridge, FeedbackInbox};
use crate::deploy::ostree::{ContentStore, OstreeStore};
use crate::deploy::processor::DeploymentProcessor;
use crate::deploy::systemd::{InitSystem, Systemd};
use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::http::ddi::DdiClient;
use crate::storage::reboot::RebootStore;
use crate::sync::interpreter::Interpreter;

/// Collaborators shared by the agent's tasks
pub struct AppState {
    /// HTTP client for the update server
    pub http_client: Arc<HttpClient>,

    /// Content store for OS and container trees
    pub store: Arc<OstreeStore>,

    /// Init system running the containers
    pub init: Arc<Systemd>,

    /// Start notification sessions
    pub bridge: Arc<FeedbackBridge>,
}

impl AppState {
    /// Initialize application state
    ///
    /// Returns the inbox through which start notifications reach the poller.
    pub async fn init(
        options: &AppOptions,
        token: SecretString,
    ) -> Result<(Self, FeedbackInbox), AgentError> {
        info!("Initializing application state...");

        options.layout.setup().await?;

        let http_client = Arc::new(HttpClient::new(&options.server_url, token)?);
        info!("Update server endpoint: {}", http_client.base_url());

        let store = Arc::new(OstreeStore::new(
            &options.layout,
            &options.content.os_remote,
            &options.content.remote_url,
            options.content.gpg_verify,
        ));

        let init = Arc::new(Systemd::new(
            options.layout.apps_dir(),
            options.layout.unit_dir(),
        ));

        let (submitter, inbox) = feedback_channel();
        let bridge = Arc::new(FeedbackBridge::new(
            options.layout.socket_dir(),
            options.notify_timeout,
            submitter,
        ));

        let state = Self {
            http_client,
            store,
            init,
            bridge,
        };

        Ok((state, inbox))
    }

    /// Bring the device to a known state before the first poll
    ///
    /// Every step is best effort; failures are logged.
    pub async fn prepare_device(&self) {
        self.store.mark_os_successful().await;

        if let Err(e) = self.store.init_remotes().await {
            error!("Initializing the content store remotes failed: {}", e);
        }

        if let Err(e) = self.container_updater().restore_installed().await {
            error!("Restoring the installed containers failed: {}", e);
        }
    }

    pub fn container_updater(&self) -> ContainerUpdater {
        let store: Arc<dyn ContentStore> = self.store.clone();
        let init: Arc<dyn InitSystem> = self.init.clone();
        ContainerUpdater::new(store, init, self.bridge.clone())
    }

    /// Build the interpreter driven by the poller worker
    pub fn interpreter(&self, options: &AppOptions, inbox: FeedbackInbox) -> Interpreter {
        let ddi: Arc<dyn DdiClient> = self.http_client.clone();
        let processor = DeploymentProcessor::new(
            ddi.clone(),
            self.container_updater(),
            RebootStore::new(options.layout.reboot_file()),
        );
        Interpreter::new(ddi, processor, inbox, options.attributes.clone())
    }

    /// Shutdown application state
    ///
    /// Start notification sessions get up to `drain_delay` to end.
    pub async fn shutdown(&self, drain_delay: Duration) -> Result<(), AgentError> {
        info!("Shutting down application state...");
        let pending = self.bridge.drain(drain_delay).await;
        if pending > 0 {
            warn!("{} notification sessions still waiting, abandoning them", pending);
        }
        Ok(())
    }
}
