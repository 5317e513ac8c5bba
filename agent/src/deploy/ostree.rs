//! Content-addressed store for OS and container trees

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::deploy::command::run;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::storage::layout::StorageLayout;
use crate::storage::revisions::RevisionFile;

/// Marker written once a container tree is fully checked out
pub const CHECKOUT_DONE: &str = "CheckoutDone";

/// Owner of checked out container trees
pub const CONTAINER_OWNER: &str = "1000:1000";

/// Content store operations used by the update paths
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch `revision` from the remote of `container`, or from the OS
    /// remote when `container` is `None`
    async fn pull(&self, revision: &str, container: Option<&str>) -> Result<(), AgentError>;

    /// Stage a pulled OS `revision` for the next boot
    async fn stage_os(&self, revision: &str) -> Result<(), AgentError>;

    /// Reset the bootloader boot counter so the staged OS gets its attempts
    async fn clear_boot_counter(&self) -> Result<(), AgentError>;

    /// Whether the device booted something other than `revision`
    async fn has_rolled_back(&self, revision: &str) -> bool;

    /// Register a remote for `container` if it has none yet
    async fn init_container_remote(&self, container: &str) -> Result<(), AgentError>;

    /// Replace the tree of `container` with `revision`
    async fn checkout(&self, container: &str, revision: &str) -> Result<(), AgentError>;

    /// Hand the tree of `container` over to the container user
    async fn register_container(&self, container: &str) -> Result<(), AgentError>;

    /// Whether `container` has a complete checkout
    async fn is_checked_out(&self, container: &str) -> bool;

    /// Containers present in the container repository
    async fn installed_containers(&self) -> Result<Vec<String>, AgentError>;

    /// Revision the container ref currently points at
    async fn current_revision(&self, container: &str) -> Result<Option<String>, AgentError>;

    /// Remember `revision` as the last good revision of `container`
    async fn set_current_revision(&self, container: &str, revision: &str)
        -> Result<(), AgentError>;

    /// Last good revision of `container`, used for rollback
    async fn previous_revision(&self, container: &str) -> Option<String>;
}

/// [`ContentStore`] backed by the `ostree` command line
pub struct OstreeStore {
    os_repo: String,
    apps_repo: String,
    apps_dir: Dir,
    os_remote: String,
    remote_url: String,
    gpg_verify: bool,
    revisions: RevisionFile,
}

impl OstreeStore {
    pub fn new(layout: &StorageLayout, os_remote: &str, remote_url: &str, gpg_verify: bool) -> Self {
        Self {
            os_repo: repo_arg(&layout.os_repo),
            apps_repo: repo_arg(&layout.apps_repo),
            apps_dir: layout.apps_dir(),
            os_remote: os_remote.to_string(),
            remote_url: remote_url.to_string(),
            gpg_verify,
            revisions: RevisionFile::new(layout.revisions_file()),
        }
    }

    /// Tell the bootloader the running OS came up fine
    pub async fn mark_os_successful(&self) {
        match run("fw_setenv", &["success", "1"], AgentError::StoreError).await {
            Ok(_) => info!("Marked the running OS as successful"),
            Err(e) => error!("Marking the running OS as successful failed: {}", e),
        }
    }

    /// Register the OS remote and one remote per installed container
    pub async fn init_remotes(&self) -> Result<(), AgentError> {
        info!("Initializing OS remote {}", self.os_remote);
        self.add_remote(&self.os_repo, &self.os_remote).await?;

        let containers = self.installed_containers().await?;
        info!("Initializing container remotes: {:?}", containers);
        for container in &containers {
            self.add_remote(&self.apps_repo, container).await?;
        }
        Ok(())
    }

    async fn add_remote(&self, repo: &str, name: &str) -> Result<(), AgentError> {
        let remotes = run("ostree", &["remote", "list", repo], AgentError::StoreError).await?;
        if remotes.lines().any(|line| line.trim() == name) {
            debug!("Remote {} already present", name);
            return Ok(());
        }

        let mut args = vec!["remote", "add", repo];
        if !self.gpg_verify {
            args.push("--no-gpg-verify");
        }
        args.extend([name, self.remote_url.as_str()]);

        run("ostree", &args, AgentError::StoreError).await?;
        info!("Added remote {} ({})", name, self.remote_url);
        Ok(())
    }

    /// Checksum of the booted deployment and whether a deployment is pending
    async fn boot_status(&self) -> Result<(Option<String>, bool), AgentError> {
        let status = run("ostree", &["admin", "status"], AgentError::StoreError).await?;
        Ok(parse_admin_status(&status))
    }
}

fn repo_arg(path: &Path) -> String {
    format!("--repo={}", path.display())
}

/// Extract the booted checksum and the pending flag from `ostree admin status`
fn parse_admin_status(status: &str) -> (Option<String>, bool) {
    let mut booted = None;
    let mut pending = false;

    for line in status.lines() {
        let line = line.trim_end();
        if line.ends_with("(pending)") {
            pending = true;
        }
        if let Some(rest) = line.strip_prefix("* ") {
            booted = rest
                .split_whitespace()
                .nth(1)
                .and_then(|deployment| deployment.split('.').next())
                .map(str::to_string);
        }
    }

    (booted, pending)
}

#[async_trait]
impl ContentStore for OstreeStore {
    async fn pull(&self, revision: &str, container: Option<&str>) -> Result<(), AgentError> {
        let (repo, remote) = match container {
            Some(name) => (self.apps_repo.as_str(), name),
            None => (self.os_repo.as_str(), self.os_remote.as_str()),
        };

        info!("Pulling {} from remote {}", revision, remote);
        run(
            "ostree",
            &["pull", repo, "--depth=1", remote, revision],
            AgentError::StoreError,
        )
        .await?;
        info!("Pulled {} from remote {}", revision, remote);
        Ok(())
    }

    async fn stage_os(&self, revision: &str) -> Result<(), AgentError> {
        run(
            "ostree",
            &["admin", "deploy", "--stage", revision],
            AgentError::StoreError,
        )
        .await?;
        info!("Staged the new OS tree, it will be used after a reboot");
        Ok(())
    }

    async fn clear_boot_counter(&self) -> Result<(), AgentError> {
        run("fw_setenv", &["init_var"], AgentError::StoreError).await?;
        info!("Cleared init_var from the bootloader environment");
        Ok(())
    }

    async fn has_rolled_back(&self, revision: &str) -> bool {
        let (booted, pending) = match self.boot_status().await {
            Ok(status) => status,
            Err(e) => {
                error!("Reading the boot status failed: {}", e);
                return false;
            }
        };

        if booted.as_deref() == Some(revision) {
            debug!("Booted on the expected revision {}", revision);
            return false;
        }

        warn!("The system rolled back, booted {:?} instead of {}", booted, revision);
        if pending {
            info!("Undeploying the pending deployment");
            if let Err(e) = run("ostree", &["admin", "undeploy", "0"], AgentError::StoreError).await
            {
                error!("Undeployment failed: {}", e);
            }
        }
        true
    }

    async fn init_container_remote(&self, container: &str) -> Result<(), AgentError> {
        self.add_remote(&self.apps_repo, container).await
    }

    async fn checkout(&self, container: &str, revision: &str) -> Result<(), AgentError> {
        let target = self.apps_dir.subdir(container);
        target.delete().await?;

        let target_path = target.path().display().to_string();
        info!("Checking out {} at {} into {}", container, revision, target_path);
        run(
            "ostree",
            &[
                "checkout",
                &self.apps_repo,
                "--user-mode",
                "--union-identical",
                revision,
                &target_path,
            ],
            AgentError::StoreError,
        )
        .await?;

        target.file(CHECKOUT_DONE).touch().await
    }

    async fn register_container(&self, container: &str) -> Result<(), AgentError> {
        let target = self.apps_dir.subdir(container).path().display().to_string();
        run("chown", &["-hR", CONTAINER_OWNER, &target], AgentError::StoreError).await?;
        Ok(())
    }

    async fn is_checked_out(&self, container: &str) -> bool {
        self.apps_dir
            .subdir(container)
            .file(CHECKOUT_DONE)
            .exists()
            .await
    }

    async fn installed_containers(&self) -> Result<Vec<String>, AgentError> {
        let refs = run("ostree", &["refs", &self.apps_repo], AgentError::StoreError).await?;
        let mut containers: Vec<String> = refs
            .lines()
            .filter_map(|line| line.trim().split_once(':'))
            .map(|(_, name)| name.to_string())
            .collect();
        containers.dedup();
        Ok(containers)
    }

    async fn current_revision(&self, container: &str) -> Result<Option<String>, AgentError> {
        let refspec = format!("{0}:{0}", container);
        match run("ostree", &["rev-parse", &self.apps_repo, &refspec], AgentError::StoreError).await
        {
            Ok(rev) if !rev.is_empty() => Ok(Some(rev)),
            Ok(_) => Ok(None),
            Err(e) => {
                debug!("No revision for {}: {}", container, e);
                Ok(None)
            }
        }
    }

    async fn set_current_revision(
        &self,
        container: &str,
        revision: &str,
    ) -> Result<(), AgentError> {
        self.revisions.set(container, revision).await
    }

    async fn previous_revision(&self, container: &str) -> Option<String> {
        match self.revisions.get(container).await {
            Ok(revision) => revision,
            Err(e) => {
                error!("Reading the revisions of {} failed: {}", container, e);
                None
            }
        }
    }
}
