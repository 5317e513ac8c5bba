//! Deployment processing
//!
//! One deployment descriptor is turned into ordered [`ChunkUpdate`]s, each
//! chunk runs through the OS or the container path, and the per-chunk
//! results are folded into a single feedback for the action.

use std::sync::Arc;

use ddi_models::{Execution, FinishedResult, Progress};
use tracing::{error, info, warn};

use crate::deploy::container::ContainerUpdater;
use crate::deploy::notify::NotifyOutcome;
use crate::errors::AgentError;
use crate::http::ddi::DdiClient;
use crate::models::deployment::ChunkUpdate;
use crate::storage::reboot::{RebootRecord, RebootStore};

pub const PROCEEDING_MESSAGE: &str = "FullMetalUpdate:Proceeding";
pub const NO_CHUNKS_MESSAGE: &str = "Deployment without chunks found. Ignoring";
pub const MULTIPLE_OS_MESSAGE: &str = "Deployment with more than one OS chunk found. Ignoring";

/// What the OS chunk of a deployment led to
enum OsOutcome {
    /// No OS chunk in this deployment
    Absent,

    /// Staged; the message is replayed after the reboot
    Staged { message: String },
}

/// Chunk whose metadata could not be understood
struct RejectedChunk {
    name: String,
    version: String,
    reason: String,
}

/// Drives deployments and owns the in-progress action
pub struct DeploymentProcessor {
    ddi: Arc<dyn DdiClient>,
    updater: ContainerUpdater,
    reboot_store: RebootStore,
    current_action: Option<String>,
}

impl DeploymentProcessor {
    pub fn new(ddi: Arc<dyn DdiClient>, updater: ContainerUpdater, reboot_store: RebootStore) -> Self {
        Self {
            ddi,
            updater,
            reboot_store,
            current_action: None,
        }
    }

    /// Action currently being deployed
    pub fn current_action(&self) -> Option<&str> {
        self.current_action.as_deref()
    }

    pub fn clear_action(&mut self) {
        if let Some(id) = self.current_action.take() {
            info!("Releasing action {}", id);
        }
    }

    pub fn updater(&self) -> &ContainerUpdater {
        &self.updater
    }

    /// Process the deployment `id` advertised with resource token `resource`
    ///
    /// Does nothing while another action is in progress. A descriptor without
    /// chunks, or with more than one OS chunk, is reported as failed and
    /// returned as a protocol error.
    pub async fn process(&mut self, id: &str, resource: &str) -> Result<(), AgentError> {
        if let Some(current) = &self.current_action {
            info!("Action {} in progress, ignoring deployment {}", current, id);
            return Ok(());
        }

        let descriptor = self.ddi.fetch_deployment(id, resource).await?;
        let chunks = &descriptor.deployment.chunks;

        if chunks.is_empty() {
            error!("Deployment {} has no chunks", id);
            self.close(id, false, vec![NO_CHUNKS_MESSAGE.to_string()])
                .await?;
            return Err(AgentError::ProtocolError(format!(
                "deployment {} has no chunks",
                id
            )));
        }

        let mut updates = Vec::with_capacity(chunks.len());
        let mut rejected = Vec::new();
        for chunk in chunks {
            match ChunkUpdate::from_chunk(chunk) {
                Ok(update) => updates.push(update),
                Err(e) => {
                    warn!("Rejecting chunk {} of deployment {}: {}", chunk.name, id, e);
                    rejected.push(RejectedChunk {
                        name: chunk.name.clone(),
                        version: chunk.version.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if updates.iter().filter(|update| update.is_os()).count() > 1 {
            error!("Deployment {} has more than one OS chunk", id);
            self.close(id, false, vec![MULTIPLE_OS_MESSAGE.to_string()])
                .await?;
            return Err(AgentError::ProtocolError(format!(
                "deployment {} has more than one OS chunk",
                id
            )));
        }

        let progress = Progress {
            cnt: 0,
            of: chunks.len() as u32,
        };
        self.ddi
            .send_deployment_feedback(
                id,
                Execution::Proceeding,
                FinishedResult::None,
                vec![PROCEEDING_MESSAGE.to_string()],
                Some(progress),
            )
            .await?;
        self.current_action = Some(id.to_string());
        info!("Processing deployment {} ({} chunks)", id, updates.len());

        // the reboot that follows an OS update lands here first
        let os_revision = updates
            .iter()
            .find(|update| update.is_os())
            .and_then(|update| update.revision.clone());
        if let Some(revision) = os_revision {
            if let Some(record) = self.take_reboot_record(&revision).await {
                return self.replay(record).await;
            }
        }

        let mut os = OsOutcome::Absent;
        for update in updates.iter_mut() {
            if update.is_os() {
                match self.update_os(id, update).await? {
                    Some(outcome) => os = outcome,
                    // failed, the action is settled
                    None => return Ok(()),
                }
            } else {
                info!("App {} v.{} - updating...", update.name, update.version);
                let updated = self.updater.update(id, update, true).await;
                update.close(updated);
            }
        }

        let apps: Vec<&mut ChunkUpdate> = updates.iter_mut().filter(|u| !u.is_os()).collect();
        if !apps.is_empty() {
            if let Err(e) = self.updater.init().reload().await {
                error!("Reloading units failed: {}", e);
            }
        }
        for update in apps {
            let started = self.updater.start_or_remove(update).await;
            update.close(update.updated && started);
        }

        let (apps_ok, mut details) = summarize(&updates, &rejected);

        match os {
            OsOutcome::Staged { message } => {
                details.push(message);
                let record = RebootRecord::new(
                    id,
                    Execution::Closed,
                    FinishedResult::from_success(apps_ok),
                    &details.join("\n"),
                );
                if let Err(e) = self.reboot_store.write(&record).await {
                    error!("Writing reboot data failed ({})", e);
                }
                self.clear_action();

                if let Err(e) = self.updater.init().reboot().await {
                    error!("Reboot failed: {}", e);
                }
            }
            OsOutcome::Absent => {
                let result = self.close(id, apps_ok, details).await;
                self.clear_action();
                result?;
            }
        }

        Ok(())
    }

    /// Read the record left by the OS update that preceded the last reboot
    async fn take_reboot_record(&self, revision: &str) -> Option<RebootRecord> {
        self.reboot_store
            .take(revision, self.updater.store())
            .await
            .unwrap_or_else(|e| {
                error!("Reading reboot data failed ({})", e);
                None
            })
    }

    /// Send the feedback stored before the reboot and release the action
    ///
    /// No chunk is installed again. When the feedback cannot be sent the
    /// record is written back for the next attempt.
    async fn replay(&mut self, record: RebootRecord) -> Result<(), AgentError> {
        info!("Replaying feedback of action {} after reboot", record.action_id);
        let sent = self
            .ddi
            .send_deployment_feedback(
                &record.action_id,
                record.execution_state,
                record.result_state,
                vec![record.msg.clone()],
                None,
            )
            .await;
        if sent.is_err() {
            if let Err(e) = self.reboot_store.write(&record).await {
                error!("Restoring reboot data failed ({})", e);
            }
        }
        self.clear_action();
        sent
    }

    /// Run the OS path for `update`
    ///
    /// Returns `None` when the OS update failed and the action was settled.
    async fn update_os(
        &mut self,
        id: &str,
        update: &mut ChunkUpdate,
    ) -> Result<Option<OsOutcome>, AgentError> {
        let revision = match update.require_revision() {
            Ok(revision) => revision.to_string(),
            Err(e) => {
                error!("Updating the OS failed ({})", e);
                update.close(false);
                self.fail_os(id, update).await?;
                return Ok(None);
            }
        };

        info!("OS {} v.{} - updating...", update.name, update.version);
        let staged = self.stage_os(&revision).await;
        update.close(staged);

        if !staged {
            self.fail_os(id, update).await?;
            return Ok(None);
        }

        let message = format!("OS {} v.{} Deployment succeed", update.name, update.version);
        let record = RebootRecord::new(id, Execution::Closed, FinishedResult::Success, &message);
        if let Err(e) = self.reboot_store.write(&record).await {
            error!("Writing reboot data failed ({})", e);
        }

        Ok(Some(OsOutcome::Staged { message }))
    }

    async fn stage_os(&self, revision: &str) -> bool {
        let store = self.updater.store();
        let staged = async {
            store.pull(revision, None).await?;
            store.stage_os(revision).await?;
            store.clear_boot_counter().await?;
            Ok::<_, AgentError>(())
        };

        match staged.await {
            Ok(()) => true,
            Err(e) => {
                error!("Updating the OS failed ({})", e);
                false
            }
        }
    }

    async fn fail_os(&mut self, id: &str, update: &ChunkUpdate) -> Result<(), AgentError> {
        let message = format!("OS {} v.{} Deployment failed", update.name, update.version);
        error!("{}", message);
        let result = self.close(id, false, vec![message]).await;
        self.clear_action();
        result
    }

    async fn close(&self, id: &str, success: bool, details: Vec<String>) -> Result<(), AgentError> {
        self.ddi
            .send_deployment_feedback(
                id,
                Execution::Closed,
                FinishedResult::from_success(success),
                details,
                None,
            )
            .await
    }

    /// Settle a container whose start notification came back
    ///
    /// A successful start records the revision as the container's last good
    /// one. Anything else rolls the container back. Either way a Closed
    /// feedback is sent for the action that installed it.
    pub async fn settle(&self, outcome: NotifyOutcome) -> Result<(), AgentError> {
        let NotifyOutcome {
            action_id,
            update,
            result,
        } = outcome;
        let description = result.describe(&update.name);

        let (finished, message) = if result.is_success() {
            info!("{}", description);
            if let Some(revision) = &update.revision {
                if let Err(e) = self
                    .updater
                    .store()
                    .set_current_revision(&update.name, revision)
                    .await
                {
                    error!("Recording the revision of {} failed: {}", update.name, e);
                }
            }
            (FinishedResult::Success, description)
        } else {
            error!("{}", description);
            let rollback = self.updater.rollback(&action_id, &update).await;
            (FinishedResult::Failure, format!("{}\n{}", description, rollback))
        };

        self.ddi
            .send_deployment_feedback(&action_id, Execution::Closed, finished, vec![message], None)
            .await
    }
}

/// Fold the container chunks into one verdict and its feedback lines
///
/// Chunks waiting for a start notification are left out of the verdict.
/// Rejected chunks count as failed.
fn summarize(updates: &[ChunkUpdate], rejected: &[RejectedChunk]) -> (bool, Vec<String>) {
    let apps: Vec<&ChunkUpdate> = updates.iter().filter(|u| !u.is_os()).collect();
    if apps.is_empty() && rejected.is_empty() {
        return (true, Vec::new());
    }

    let mut success = rejected.is_empty();
    let mut failed: Vec<&str> = rejected.iter().map(|chunk| chunk.name.as_str()).collect();
    let mut lines: Vec<String> = rejected
        .iter()
        .map(|chunk| {
            format!(
                "Chunk {} v.{} rejected ({})",
                chunk.name, chunk.version, chunk.reason
            )
        })
        .collect();

    for update in &apps {
        if update.deferred {
            lines.push(format!(
                "App {} v.{} installed, waiting for its start notification",
                update.name, update.version
            ));
            continue;
        }

        if update.updated {
            lines.push(format!("App {} v.{} Deployment succeed", update.name, update.version));
        } else {
            success = false;
            failed.push(update.name.as_str());
            lines.push(format!("App {} v.{} Deployment failed", update.name, update.version));
        }
    }

    let summary = if success && apps.iter().all(|u| u.deferred) {
        "All applications have been installed, start notifications pending.".to_string()
    } else if success {
        "All applications have been updated and correctly restarted.".to_string()
    } else {
        format!("{} failed to update and / or to restart.", failed.join(" "))
    };

    let mut details = vec![summary];
    details.extend(lines);
    (success, details)
}
