//! API models

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout used in feedback bodies
pub const FEEDBACK_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Hyperlink to a controller resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
}

/// Links advertised by the base resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Links {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_data: Option<Link>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_base: Option<Link>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_action: Option<Link>,
}

/// Polling configuration suggested by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polling {
    /// `HH:MM:SS`
    pub sleep: String,
}

/// Controller configuration section of the base resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub polling: Polling,
}

/// Base resource returned on every poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseResource {
    pub config: ControllerConfig,

    #[serde(rename = "_links", default)]
    pub links: Option<Links>,
}

impl BaseResource {
    /// Links of the resource, empty when the server advertised none
    pub fn links(&self) -> Links {
        self.links.clone().unwrap_or_default()
    }
}

/// One key/value pair attached to a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub key: String,
    pub value: String,
}

/// One deployable item of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub part: String,
    pub version: String,
    pub name: String,

    #[serde(default)]
    pub metadata: Vec<Metadata>,
}

/// Deployment section of a deployment descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,

    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

/// Deployment descriptor fetched from `deploymentBase/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentBase {
    pub id: String,
    pub deployment: Deployment,
}

/// Cancel section of a cancel-action resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelDetails {
    pub stop_id: String,
}

/// Cancel-action resource fetched from `cancelAction/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAction {
    pub id: String,
    pub cancel_action: CancelDetails,
}

/// Execution state reported in feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Execution {
    Closed,
    Proceeding,
    Canceled,
    Scheduled,
    Rejected,
    Resumed,
    Downloaded,
    Download,
}

impl Execution {
    /// Stable integer code used when the value is persisted locally
    pub fn code(self) -> u8 {
        match self {
            Execution::Closed => 0,
            Execution::Proceeding => 1,
            Execution::Canceled => 2,
            Execution::Scheduled => 3,
            Execution::Rejected => 4,
            Execution::Resumed => 5,
            Execution::Downloaded => 6,
            Execution::Download => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let execution = match code {
            0 => Execution::Closed,
            1 => Execution::Proceeding,
            2 => Execution::Canceled,
            3 => Execution::Scheduled,
            4 => Execution::Rejected,
            5 => Execution::Resumed,
            6 => Execution::Downloaded,
            7 => Execution::Download,
            _ => return None,
        };
        Some(execution)
    }
}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Execution::Closed => "closed",
            Execution::Proceeding => "proceeding",
            Execution::Canceled => "canceled",
            Execution::Scheduled => "scheduled",
            Execution::Rejected => "rejected",
            Execution::Resumed => "resumed",
            Execution::Downloaded => "downloaded",
            Execution::Download => "download",
        };
        f.write_str(s)
    }
}

/// Final result reported in feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishedResult {
    Success,
    Failure,
    None,
}

impl FinishedResult {
    /// Stable integer code used when the value is persisted locally
    pub fn code(self) -> u8 {
        match self {
            FinishedResult::Success => 0,
            FinishedResult::Failure => 1,
            FinishedResult::None => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FinishedResult::Success),
            1 => Some(FinishedResult::Failure),
            2 => Some(FinishedResult::None),
            _ => None,
        }
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            FinishedResult::Success
        } else {
            FinishedResult::Failure
        }
    }
}

impl fmt::Display for FinishedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FinishedResult::Success => "success",
            FinishedResult::Failure => "failure",
            FinishedResult::None => "none",
        };
        f.write_str(s)
    }
}

/// Progress indicator attached to a proceeding feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub cnt: u32,
    pub of: u32,
}

/// Result section of a feedback status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    pub finished: FinishedResult,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

/// Status section of a feedback body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub execution: Execution,
    pub result: StatusResult,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Feedback body for deployment and cancel actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFeedback {
    pub id: String,
    pub time: String,
    pub status: Status,
}

impl ActionFeedback {
    pub fn new(
        id: &str,
        execution: Execution,
        finished: FinishedResult,
        details: Vec<String>,
        progress: Option<Progress>,
    ) -> Self {
        Self {
            id: id.to_string(),
            time: feedback_time(Utc::now()),
            status: Status {
                execution,
                result: StatusResult { finished, progress },
                details,
            },
        }
    }
}

/// Update mode for the `configData` attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigDataMode {
    Merge,
    Replace,
    Remove,
}

/// Body sent to `configData` to identify the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigData {
    pub id: String,
    pub time: String,
    pub status: Status,
    pub data: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ConfigDataMode>,
}

impl ConfigData {
    pub fn new(
        execution: Execution,
        finished: FinishedResult,
        data: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: String::new(),
            time: feedback_time(Utc::now()),
            status: Status {
                execution,
                result: StatusResult {
                    finished,
                    progress: None,
                },
                details: Vec::new(),
            },
            data,
            mode: Some(ConfigDataMode::Merge),
        }
    }
}

/// Format a timestamp the way feedback bodies expect it
pub fn feedback_time(at: DateTime<Utc>) -> String {
    at.format(FEEDBACK_TIME_FORMAT).to_string()
}
