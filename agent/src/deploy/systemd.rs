//! Container units managed through systemd

use async_trait::async_trait;
use tokio::fs;
use tracing::{info, warn};

use crate::deploy::command::run;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;

/// Marker file enabling automatic start of a container
pub const AUTOSTART_MARKER: &str = "auto.start";

/// Unit template shipped inside each container tree
pub const UNIT_TEMPLATE: &str = "systemd.service";

/// How a container is handled once its unit is in place
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartPolicy {
    pub autostart: bool,
    pub autoremove: bool,
    /// No unit existed before this installation
    pub first_install: bool,
}

/// Init system operations used by the update paths
#[async_trait]
pub trait InitSystem: Send + Sync {
    /// Reload unit definitions
    async fn reload(&self) -> Result<(), AgentError>;

    /// Whether a unit for `container` is known
    async fn unit_exists(&self, container: &str) -> bool;

    /// Install the unit shipped with `container`
    async fn create_unit(&self, container: &str) -> Result<(), AgentError>;

    async fn start_unit(&self, container: &str) -> Result<(), AgentError>;

    async fn stop_unit(&self, container: &str) -> Result<(), AgentError>;

    /// Apply the container's start policy once its unit is in place
    ///
    /// With `autoremove` the tree is deleted. A first installation starts
    /// the unit only when the tree ships the autostart marker. Otherwise
    /// `autostart` writes the marker and starts the unit, and its absence
    /// removes the marker. Returns whether every step succeeded.
    async fn start_or_remove(&self, container: &str, policy: StartPolicy) -> bool;

    /// Whether `container` carries the autostart marker
    async fn autostart_enabled(&self, container: &str) -> bool;

    /// Restart the device
    async fn reboot(&self) -> Result<(), AgentError>;
}

/// [`InitSystem`] driving `systemctl`
pub struct Systemd {
    apps_dir: Dir,
    unit_dir: Dir,
}

impl Systemd {
    pub fn new(apps_dir: Dir, unit_dir: Dir) -> Self {
        Self { apps_dir, unit_dir }
    }

    async fn systemctl(&self, args: &[&str]) -> Result<String, AgentError> {
        run("systemctl", args, AgentError::InitError).await
    }

    async fn apply_policy(&self, container: &str, policy: StartPolicy) -> Result<(), AgentError> {
        let tree = self.apps_dir.subdir(container);
        let marker = tree.file(AUTOSTART_MARKER);

        if policy.autoremove {
            info!("Removing container {}", container);
            return tree.delete().await;
        }

        if policy.first_install {
            info!("First installation of {}", container);
            if marker.exists().await {
                return self.start_unit(container).await;
            }
            return Ok(());
        }

        if policy.autostart {
            marker.touch().await?;
            self.start_unit(container).await
        } else {
            marker.delete().await
        }
    }
}

fn unit_name(container: &str) -> String {
    format!("{}.service", container)
}

#[async_trait]
impl InitSystem for Systemd {
    async fn reload(&self) -> Result<(), AgentError> {
        self.systemctl(&["daemon-reload"]).await?;
        Ok(())
    }

    async fn unit_exists(&self, container: &str) -> bool {
        let unit = unit_name(container);
        match self.systemctl(&["show", "-p", "LoadState", "--value", &unit]).await {
            Ok(state) => state != "not-found",
            Err(_) => false,
        }
    }

    async fn create_unit(&self, container: &str) -> Result<(), AgentError> {
        let template = self.apps_dir.subdir(container).file(UNIT_TEMPLATE);
        let unit = self.unit_dir.file(&unit_name(container));

        self.unit_dir.create().await?;
        fs::copy(template.path(), unit.path()).await?;
        info!("Installed unit {}", unit.path().display());
        Ok(())
    }

    async fn start_unit(&self, container: &str) -> Result<(), AgentError> {
        let unit = unit_name(container);
        self.systemctl(&["enable", &unit]).await?;
        self.systemctl(&["start", &unit]).await?;
        info!("Started {}", unit);
        Ok(())
    }

    async fn stop_unit(&self, container: &str) -> Result<(), AgentError> {
        let unit = unit_name(container);
        self.systemctl(&["stop", &unit]).await?;
        self.systemctl(&["disable", &unit]).await?;
        info!("Stopped {}", unit);
        Ok(())
    }

    async fn start_or_remove(&self, container: &str, policy: StartPolicy) -> bool {
        match self.apply_policy(container, policy).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Start policy of {} failed: {}", container, e);
                false
            }
        }
    }

    async fn autostart_enabled(&self, container: &str) -> bool {
        self.apps_dir
            .subdir(container)
            .file(AUTOSTART_MARKER)
            .exists()
            .await
    }

    async fn reboot(&self) -> Result<(), AgentError> {
        info!("Rebooting the device");
        self.systemctl(&["reboot"]).await?;
        Ok(())
    }
}
