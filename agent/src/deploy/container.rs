//! Application container update path

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::deploy::notify::FeedbackBridge;
use crate::deploy::ostree::ContentStore;
use crate::deploy::systemd::{InitSystem, StartPolicy};
use crate::errors::AgentError;
use crate::models::deployment::ChunkUpdate;

/// Installs container revisions and rolls them back
pub struct ContainerUpdater {
    store: Arc<dyn ContentStore>,
    init: Arc<dyn InitSystem>,
    bridge: Arc<FeedbackBridge>,
}

impl ContainerUpdater {
    pub fn new(
        store: Arc<dyn ContentStore>,
        init: Arc<dyn InitSystem>,
        bridge: Arc<FeedbackBridge>,
    ) -> Self {
        Self {
            store,
            init,
            bridge,
        }
    }

    pub fn init(&self) -> &dyn InitSystem {
        self.init.as_ref()
    }

    pub fn store(&self) -> &dyn ContentStore {
        self.store.as_ref()
    }

    pub fn bridge(&self) -> &FeedbackBridge {
        &self.bridge
    }

    /// Install the revision of `update`; returns whether every step succeeded
    ///
    /// With `allow_notify`, a container that reports its own start gets a
    /// notification session and is marked deferred.
    pub async fn update(&self, action_id: &str, update: &mut ChunkUpdate, allow_notify: bool) -> bool {
        match self.install(action_id, update, allow_notify).await {
            Ok(()) => true,
            Err(e) => {
                error!("Updating {} failed ({})", update.name, e);
                false
            }
        }
    }

    async fn install(
        &self,
        action_id: &str,
        update: &mut ChunkUpdate,
        allow_notify: bool,
    ) -> Result<(), AgentError> {
        let revision = update.require_revision()?.to_string();
        let name = update.name.clone();

        self.store.init_container_remote(&name).await?;
        self.store.pull(&revision, Some(&name)).await?;

        update.first_install = !self.init.unit_exists(&name).await;
        if !update.first_install {
            info!("Stopping the container {}", name);
            self.init.stop_unit(&name).await?;
        }

        self.store.checkout(&name, &revision).await?;
        self.store.register_container(&name).await?;
        self.init.create_unit(&name).await?;

        let awaits_notification = update
            .app_options()
            .is_some_and(|options| options.awaits_notification());
        if allow_notify && awaits_notification {
            self.bridge.open(action_id, update).await?;
            update.deferred = true;
        }

        Ok(())
    }

    /// Apply the start policy carried by `update`
    pub async fn start_or_remove(&self, update: &ChunkUpdate) -> bool {
        let options = update.app_options().cloned().unwrap_or_default();
        let policy = StartPolicy {
            autostart: options.autostart,
            autoremove: options.autoremove,
            first_install: update.first_install,
        };
        self.init.start_or_remove(&update.name, policy).await
    }

    /// Put `update`'s container back on its last good revision
    ///
    /// Returns the feedback text describing what happened.
    pub async fn rollback(&self, action_id: &str, update: &ChunkUpdate) -> String {
        let Some(previous) = self.store.previous_revision(&update.name).await else {
            warn!("No previous revision of {}, cannot roll back", update.name);
            return "No prior installation of the container, cannot rollback.".to_string();
        };

        info!("Rolling {} back to {}", update.name, previous);
        let mut target = update.clone();
        target.revision = Some(previous);
        target.deferred = false;

        let mut restored = self.update(action_id, &mut target, false).await;
        if let Err(e) = self.init.reload().await {
            error!("Reloading units failed: {}", e);
            restored = false;
        }
        restored &= self.start_or_remove(&target).await;

        if restored {
            "Container has rolled back.".to_string()
        } else {
            "Container has failed to roll back.".to_string()
        }
    }

    /// Check out and start the containers already present in the store
    ///
    /// Trees without a completed checkout are checked out at their current
    /// ref first. Containers carrying the autostart marker are started.
    pub async fn restore_installed(&self) -> Result<(), AgentError> {
        let containers = self.store.installed_containers().await?;
        info!("There are {} containers to restore", containers.len());

        for name in &containers {
            if !self.store.is_checked_out(name).await {
                let Some(revision) = self.store.current_revision(name).await? else {
                    warn!("Container {} has no revision, skipping", name);
                    continue;
                };
                self.store.checkout(name, &revision).await?;
                self.store.register_container(name).await?;
            }
            self.init.create_unit(name).await?;
        }

        self.init.reload().await?;

        for name in &containers {
            if self.init.autostart_enabled(name).await {
                self.init.start_unit(name).await?;
            }
        }

        Ok(())
    }
}
