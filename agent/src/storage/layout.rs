//! Storage layout configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Filesystem locations used by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageLayout {
    /// Persistent agent state (reboot record, container revisions)
    pub state_dir: PathBuf,

    /// Directory holding the per-container notification sockets
    pub socket_dir: PathBuf,

    /// Root of the checked out container trees
    pub apps_dir: PathBuf,

    /// Content repository for containers
    pub apps_repo: PathBuf,

    /// Content repository for the OS
    pub os_repo: PathBuf,

    /// Where container units are installed
    pub unit_dir: PathBuf,
}

impl StorageLayout {
    /// File holding the feedback that must survive an OS reboot
    pub fn reboot_file(&self) -> File {
        File::new(self.state_dir.join("reboot_data.json"))
    }

    /// File mapping each container to its last known good revision
    pub fn revisions_file(&self) -> File {
        File::new(self.state_dir.join("current_revs.json"))
    }

    pub fn socket_dir(&self) -> Dir {
        Dir::new(&self.socket_dir)
    }

    pub fn apps_dir(&self) -> Dir {
        Dir::new(&self.apps_dir)
    }

    pub fn unit_dir(&self) -> Dir {
        Dir::new(&self.unit_dir)
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), AgentError> {
        Dir::new(&self.state_dir).create().await?;
        self.socket_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/local/fullmetalupdate"),
            socket_dir: PathBuf::from("/tmp/fullmetalupdate"),
            apps_dir: PathBuf::from("/apps"),
            apps_repo: PathBuf::from("/apps/ostree_repo"),
            os_repo: PathBuf::from("/ostree/repo"),
            unit_dir: PathBuf::from("/etc/systemd/system"),
        }
    }
}
