//! Last known good revision of each container

use std::collections::BTreeMap;

use crate::errors::AgentError;
use crate::filesys::file::File;

/// JSON map `container name -> revision`
#[derive(Debug, Clone)]
pub struct RevisionFile {
    file: File,
}

impl RevisionFile {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, AgentError> {
        if !self.file.exists().await {
            return Ok(BTreeMap::new());
        }
        self.file.read_json().await
    }

    /// Revision recorded for `container`, if any
    pub async fn get(&self, container: &str) -> Result<Option<String>, AgentError> {
        Ok(self.load().await?.remove(container))
    }

    /// Record `revision` as the good revision of `container`
    pub async fn set(&self, container: &str, revision: &str) -> Result<(), AgentError> {
        let mut revisions = self.load().await?;
        revisions.insert(container.to_string(), revision.to_string());
        self.file.write_json(&revisions).await
    }
}
