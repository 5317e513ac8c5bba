//! Deployment models

use std::time::Duration;

use ddi_models::{Chunk, Execution, FinishedResult};

use crate::errors::AgentError;

/// Wire name of an OS chunk
pub const PART_OS: &str = "os";

/// Wire name of an application container chunk
pub const PART_APP: &str = "bApp";

/// Options carried by an application container chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppOptions {
    /// Start the container once it is installed
    pub autostart: bool,

    /// Delete the container instead of running it
    pub autoremove: bool,

    /// Wait for the container's own start notification
    pub notify: bool,

    /// How long to wait for the notification
    pub timeout: Option<Duration>,
}

impl AppOptions {
    /// Whether the final verdict for this container comes from its start
    /// notification rather than from the install steps
    pub fn awaits_notification(&self) -> bool {
        self.autostart && self.notify && !self.autoremove
    }
}

/// What a chunk updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Os,
    App(AppOptions),
}

/// One deployable item of a deployment, with its progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUpdate {
    pub name: String,
    pub version: String,

    /// Content store commit to install
    pub revision: Option<String>,

    pub part: Part,

    pub execution: Execution,
    pub result: FinishedResult,

    /// Whether the update steps succeeded so far
    pub updated: bool,

    /// Set once a start notification session was opened for this chunk
    pub deferred: bool,

    /// No unit existed for the container when it was installed
    pub first_install: bool,
}

impl ChunkUpdate {
    /// Build an update from one descriptor chunk
    ///
    /// Unknown metadata keys are ignored; missing ones keep their default.
    pub fn from_chunk(chunk: &Chunk) -> Result<Self, AgentError> {
        let mut revision = None;
        let mut options = AppOptions::default();

        for meta in &chunk.metadata {
            match meta.key.as_str() {
                "rev" => revision = Some(meta.value.clone()),
                "autostart" => options.autostart = parse_flag(&meta.key, &meta.value)?,
                "autoremove" => options.autoremove = parse_flag(&meta.key, &meta.value)?,
                "notify" => options.notify = parse_flag(&meta.key, &meta.value)?,
                "timeout" => {
                    let secs = meta.value.trim().parse::<u64>().map_err(|_| {
                        AgentError::ProtocolError(format!(
                            "chunk {}: invalid timeout '{}'",
                            chunk.name, meta.value
                        ))
                    })?;
                    options.timeout = Some(Duration::from_secs(secs));
                }
                _ => {}
            }
        }

        let part = match chunk.part.as_str() {
            PART_OS => Part::Os,
            PART_APP => Part::App(options),
            other => {
                return Err(AgentError::ProtocolError(format!(
                    "chunk {}: unsupported part '{}'",
                    chunk.name, other
                )))
            }
        };

        Ok(Self {
            name: chunk.name.clone(),
            version: chunk.version.clone(),
            revision,
            part,
            execution: Execution::Proceeding,
            result: FinishedResult::None,
            updated: false,
            deferred: false,
            first_install: false,
        })
    }

    pub fn is_os(&self) -> bool {
        matches!(self.part, Part::Os)
    }

    pub fn app_options(&self) -> Option<&AppOptions> {
        match &self.part {
            Part::App(options) => Some(options),
            Part::Os => None,
        }
    }

    /// Revision to install, required by both update paths
    pub fn require_revision(&self) -> Result<&str, AgentError> {
        self.revision.as_deref().ok_or_else(|| {
            AgentError::ProtocolError(format!("chunk {} carries no revision", self.name))
        })
    }

    /// Record the end of the update steps
    pub fn close(&mut self, success: bool) {
        self.updated = success;
        self.execution = Execution::Closed;
        self.result = FinishedResult::from_success(success);
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, AgentError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        other => Err(AgentError::ProtocolError(format!(
            "invalid value '{}' for {}",
            other, key
        ))),
    }
}
