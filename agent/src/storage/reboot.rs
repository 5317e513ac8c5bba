//! Feedback kept across an OS reboot
//!
//! An OS update ends with a reboot, so its feedback cannot be sent in the
//! same process. The result is written here right before the reboot and
//! replayed, once, by the first deployment cycle after the restart.

use ddi_models::{Execution, FinishedResult};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::deploy::ostree::ContentStore;
use crate::errors::AgentError;
use crate::filesys::file::File;

/// Current on-disk layout of [`RebootRecord`]
pub const REBOOT_RECORD_SCHEMA: u32 = 1;

/// Message replacing the stored one when the bootloader fell back
pub const ROLLBACK_MESSAGE: &str = "Deployment has failed and system has rolled back";

/// Pending feedback of one OS deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebootRecord {
    #[serde(default = "default_schema")]
    pub schema: u32,

    pub action_id: String,

    #[serde(with = "execution_code")]
    pub execution_state: Execution,

    #[serde(with = "result_code")]
    pub result_state: FinishedResult,

    pub msg: String,
}

fn default_schema() -> u32 {
    REBOOT_RECORD_SCHEMA
}

impl RebootRecord {
    pub fn new(
        action_id: &str,
        execution_state: Execution,
        result_state: FinishedResult,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            schema: REBOOT_RECORD_SCHEMA,
            action_id: action_id.to_string(),
            execution_state,
            result_state,
            msg: msg.into(),
        }
    }
}

mod execution_code {
    use ddi_models::Execution;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Execution, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(value.code())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Execution, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Execution::from_code(code)
            .ok_or_else(|| D::Error::custom(format!("unknown execution code {}", code)))
    }
}

mod result_code {
    use ddi_models::FinishedResult;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &FinishedResult,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(value.code())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<FinishedResult, D::Error> {
        let code = u8::deserialize(deserializer)?;
        FinishedResult::from_code(code)
            .ok_or_else(|| D::Error::custom(format!("unknown result code {}", code)))
    }
}

/// Single-slot store for [`RebootRecord`]
#[derive(Debug, Clone)]
pub struct RebootStore {
    file: File,
}

impl RebootStore {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Persist `record`, replacing any record already on disk
    pub async fn write(&self, record: &RebootRecord) -> Result<(), AgentError> {
        self.file.write_json(record).await?;
        info!(
            "Stored reboot feedback for action {} at {}",
            record.action_id,
            self.file.path().display()
        );
        Ok(())
    }

    /// Read the pending record and delete it from disk
    ///
    /// When the device booted something other than `revision`, the stored
    /// result is downgraded to a failure before the record is returned.
    pub async fn take(
        &self,
        revision: &str,
        store: &dyn ContentStore,
    ) -> Result<Option<RebootRecord>, AgentError> {
        if !self.file.exists().await {
            return Ok(None);
        }

        let parsed = self.file.read_json::<RebootRecord>().await;
        // a record that cannot be deleted is still replayed
        if let Err(e) = self.file.delete().await {
            error!(
                "Deleting reboot record {} failed: {}",
                self.file.path().display(),
                e
            );
        }

        let mut record = match parsed {
            Ok(record) => record,
            Err(e) => {
                error!("Discarding unreadable reboot record: {}", e);
                return Ok(None);
            }
        };

        if record.schema != REBOOT_RECORD_SCHEMA {
            warn!(
                "Discarding reboot record with unsupported schema {}",
                record.schema
            );
            return Ok(None);
        }

        if store.has_rolled_back(revision).await {
            warn!("Booted revision differs from {}, reporting rollback", revision);
            record.result_state = FinishedResult::Failure;
            record.msg = ROLLBACK_MESSAGE.to_string();
        }

        Ok(Some(record))
    }
}
