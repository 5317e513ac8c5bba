//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ddi_models::{
    BaseResource, CancelAction, CancelDetails, Chunk, ControllerConfig, Deployment,
    DeploymentBase, Execution, FinishedResult, Link, Links, Metadata, Polling, Progress,
};
use tempfile::TempDir;

use fmupdate::deploy::container::ContainerUpdater;
use fmupdate::deploy::notify::{feedback_channel, FeedbackBridge, FeedbackInbox};
use fmupdate::deploy::ostree::ContentStore;
use fmupdate::deploy::processor::DeploymentProcessor;
use fmupdate::deploy::systemd::{InitSystem, StartPolicy};
use fmupdate::errors::AgentError;
use fmupdate::filesys::dir::Dir;
use fmupdate::filesys::file::File;
use fmupdate::http::ddi::DdiClient;
use fmupdate::storage::reboot::RebootStore;
use fmupdate::sync::interpreter::Interpreter;

// ================================ SERVER ===================================== //

/// One request body the agent sent to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Config {
        execution: Execution,
        result: FinishedResult,
        data: BTreeMap<String, String>,
    },
    Cancel {
        id: String,
        execution: Execution,
        result: FinishedResult,
        details: Vec<String>,
    },
    Deployment {
        id: String,
        execution: Execution,
        result: FinishedResult,
        details: Vec<String>,
        progress: Option<Progress>,
    },
}

#[derive(Default)]
pub struct MockDdi {
    pub bases: Mutex<VecDeque<BaseResource>>,
    pub deployments: Mutex<HashMap<String, DeploymentBase>>,
    pub cancels: Mutex<HashMap<String, CancelAction>>,
    pub sent: Mutex<Vec<Sent>>,
    /// Reject Closed deployment feedbacks
    pub fail_closed: AtomicBool,
}

impl MockDdi {
    pub fn push_base(&self, base: BaseResource) {
        self.bases.lock().unwrap().push_back(base);
    }

    pub fn add_deployment(&self, deployment: DeploymentBase) {
        self.deployments
            .lock()
            .unwrap()
            .insert(deployment.id.clone(), deployment);
    }

    pub fn add_cancel(&self, id: &str, stop_id: &str) {
        self.cancels.lock().unwrap().insert(
            id.to_string(),
            CancelAction {
                id: id.to_string(),
                cancel_action: CancelDetails {
                    stop_id: stop_id.to_string(),
                },
            },
        );
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Deployment feedbacks with a Closed execution
    pub fn closed(&self) -> Vec<(String, FinishedResult, Vec<String>)> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Deployment {
                    id,
                    execution: Execution::Closed,
                    result,
                    details,
                    ..
                } => Some((id, result, details)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, sent: Sent) -> Result<(), AgentError> {
        let closing = matches!(
            sent,
            Sent::Deployment {
                execution: Execution::Closed,
                ..
            }
        );
        if closing && self.fail_closed.load(Ordering::SeqCst) {
            return Err(AgentError::ServerError {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(sent);
        Ok(())
    }
}

#[async_trait]
impl DdiClient for MockDdi {
    async fn fetch_base(&self) -> Result<BaseResource, AgentError> {
        self.bases.lock().unwrap().pop_front().ok_or_else(|| {
            AgentError::IoError(std::io::Error::from(std::io::ErrorKind::TimedOut))
        })
    }

    async fn send_config_feedback(
        &self,
        execution: Execution,
        result: FinishedResult,
        data: &BTreeMap<String, String>,
    ) -> Result<(), AgentError> {
        self.record(Sent::Config {
            execution,
            result,
            data: data.clone(),
        })
    }

    async fn fetch_cancel_action(&self, id: &str) -> Result<CancelAction, AgentError> {
        self.cancels
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::ServerError {
                status: 404,
                body: id.to_string(),
            })
    }

    async fn send_cancel_feedback(
        &self,
        id: &str,
        execution: Execution,
        result: FinishedResult,
        details: Vec<String>,
    ) -> Result<(), AgentError> {
        self.record(Sent::Cancel {
            id: id.to_string(),
            execution,
            result,
            details,
        })
    }

    async fn fetch_deployment(
        &self,
        id: &str,
        _resource: &str,
    ) -> Result<DeploymentBase, AgentError> {
        self.deployments
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::ServerError {
                status: 404,
                body: id.to_string(),
            })
    }

    async fn send_deployment_feedback(
        &self,
        id: &str,
        execution: Execution,
        result: FinishedResult,
        details: Vec<String>,
        progress: Option<Progress>,
    ) -> Result<(), AgentError> {
        self.record(Sent::Deployment {
            id: id.to_string(),
            execution,
            result,
            details,
            progress,
        })
    }
}

// ============================== CONTENT STORE ================================ //

#[derive(Default)]
pub struct MockStore {
    pub calls: Mutex<Vec<String>>,
    pub failing: Mutex<HashSet<String>>,
    pub rolled_back: AtomicBool,
    pub revisions: Mutex<HashMap<String, String>>,
    pub installed: Mutex<Vec<String>>,
    pub checked_out: Mutex<HashSet<String>>,
    /// Leave every pull pending forever
    pub hang: AtomicBool,
}

impl MockStore {
    /// Make every call to `operation` fail
    pub fn fail(&self, operation: &str) {
        self.failing.lock().unwrap().insert(operation.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_revision(&self, container: &str, revision: &str) {
        self.revisions
            .lock()
            .unwrap()
            .insert(container.to_string(), revision.to_string());
    }

    pub fn revision(&self, container: &str) -> Option<String> {
        self.revisions.lock().unwrap().get(container).cloned()
    }

    fn call(&self, operation: &str, args: &str) -> Result<(), AgentError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", operation, args).trim_end().to_string());
        if self.failing.lock().unwrap().contains(operation) {
            return Err(AgentError::StoreError(format!("{} failed", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MockStore {
    async fn pull(&self, revision: &str, container: Option<&str>) -> Result<(), AgentError> {
        self.call("pull", &format!("{} {}", revision, container.unwrap_or("os")))?;
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn stage_os(&self, revision: &str) -> Result<(), AgentError> {
        self.call("stage_os", revision)
    }

    async fn clear_boot_counter(&self) -> Result<(), AgentError> {
        self.call("clear_boot_counter", "")
    }

    async fn has_rolled_back(&self, _revision: &str) -> bool {
        self.rolled_back.load(Ordering::SeqCst)
    }

    async fn init_container_remote(&self, container: &str) -> Result<(), AgentError> {
        self.call("init_container_remote", container)
    }

    async fn checkout(&self, container: &str, revision: &str) -> Result<(), AgentError> {
        self.call("checkout", &format!("{} {}", container, revision))?;
        self.checked_out.lock().unwrap().insert(container.to_string());
        Ok(())
    }

    async fn register_container(&self, container: &str) -> Result<(), AgentError> {
        self.call("register_container", container)
    }

    async fn is_checked_out(&self, container: &str) -> bool {
        self.checked_out.lock().unwrap().contains(container)
    }

    async fn installed_containers(&self) -> Result<Vec<String>, AgentError> {
        Ok(self.installed.lock().unwrap().clone())
    }

    async fn current_revision(&self, container: &str) -> Result<Option<String>, AgentError> {
        Ok(Some(format!("{}-head", container)))
    }

    async fn set_current_revision(
        &self,
        container: &str,
        revision: &str,
    ) -> Result<(), AgentError> {
        self.set_revision(container, revision);
        Ok(())
    }

    async fn previous_revision(&self, container: &str) -> Option<String> {
        self.revision(container)
    }
}

// ============================== INIT SYSTEM ================================== //

pub struct MockInit {
    pub calls: Mutex<Vec<String>>,
    pub units: Mutex<HashSet<String>>,
    pub autostart: Mutex<HashSet<String>>,
    pub start_ok: AtomicBool,
    pub fail_reboot: AtomicBool,
}

impl Default for MockInit {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            units: Mutex::new(HashSet::new()),
            autostart: Mutex::new(HashSet::new()),
            start_ok: AtomicBool::new(true),
            fail_reboot: AtomicBool::new(false),
        }
    }
}

impl MockInit {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn call(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl InitSystem for MockInit {
    async fn reload(&self) -> Result<(), AgentError> {
        self.call("reload".to_string());
        Ok(())
    }

    async fn unit_exists(&self, container: &str) -> bool {
        self.units.lock().unwrap().contains(container)
    }

    async fn create_unit(&self, container: &str) -> Result<(), AgentError> {
        self.call(format!("create_unit {}", container));
        self.units.lock().unwrap().insert(container.to_string());
        Ok(())
    }

    async fn start_unit(&self, container: &str) -> Result<(), AgentError> {
        self.call(format!("start_unit {}", container));
        Ok(())
    }

    async fn stop_unit(&self, container: &str) -> Result<(), AgentError> {
        self.call(format!("stop_unit {}", container));
        Ok(())
    }

    async fn start_or_remove(&self, container: &str, policy: StartPolicy) -> bool {
        self.call(format!(
            "start_or_remove {} autostart={} autoremove={} first_install={}",
            container, policy.autostart, policy.autoremove, policy.first_install
        ));
        self.start_ok.load(Ordering::SeqCst)
    }

    async fn autostart_enabled(&self, container: &str) -> bool {
        self.autostart.lock().unwrap().contains(container)
    }

    async fn reboot(&self) -> Result<(), AgentError> {
        self.call("reboot".to_string());
        if self.fail_reboot.load(Ordering::SeqCst) {
            return Err(AgentError::InitError("reboot refused".to_string()));
        }
        Ok(())
    }
}

// ================================ HARNESS ==================================== //

pub struct Harness {
    pub ddi: Arc<MockDdi>,
    pub store: Arc<MockStore>,
    pub init: Arc<MockInit>,
    pub bridge: Arc<FeedbackBridge>,
    pub inbox: Option<FeedbackInbox>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_notify_timeout(Duration::from_secs(5))
    }

    pub fn with_notify_timeout(timeout: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (submitter, inbox) = feedback_channel();
        let bridge = Arc::new(FeedbackBridge::new(
            Dir::new(dir.path().join("sockets")),
            timeout,
            submitter,
        ));

        Self {
            ddi: Arc::new(MockDdi::default()),
            store: Arc::new(MockStore::default()),
            init: Arc::new(MockInit::default()),
            bridge,
            inbox: Some(inbox),
            dir,
        }
    }

    pub fn updater(&self) -> ContainerUpdater {
        let store: Arc<dyn ContentStore> = self.store.clone();
        let init: Arc<dyn InitSystem> = self.init.clone();
        ContainerUpdater::new(store, init, self.bridge.clone())
    }

    pub fn reboot_store(&self) -> RebootStore {
        RebootStore::new(File::new(self.dir.path().join("reboot_data.json")))
    }

    pub fn processor(&self) -> DeploymentProcessor {
        let ddi: Arc<dyn DdiClient> = self.ddi.clone();
        DeploymentProcessor::new(ddi, self.updater(), self.reboot_store())
    }

    pub fn take_inbox(&mut self) -> FeedbackInbox {
        self.inbox.take().unwrap()
    }

    pub fn interpreter(&mut self, attributes: BTreeMap<String, String>) -> Interpreter {
        let ddi: Arc<dyn DdiClient> = self.ddi.clone();
        let processor = self.processor();
        let inbox = self.take_inbox();
        Interpreter::new(ddi, processor, inbox, attributes)
    }
}

// =============================== DESCRIPTORS ================================= //

pub fn chunk(part: &str, name: &str, metadata: &[(&str, &str)]) -> Chunk {
    Chunk {
        part: part.to_string(),
        version: "1.0".to_string(),
        name: name.to_string(),
        metadata: metadata
            .iter()
            .map(|(key, value)| Metadata {
                key: key.to_string(),
                value: value.to_string(),
            })
            .collect(),
    }
}

pub fn deployment(id: &str, chunks: Vec<Chunk>) -> DeploymentBase {
    DeploymentBase {
        id: id.to_string(),
        deployment: Deployment {
            download: Some("forced".to_string()),
            update: Some("forced".to_string()),
            chunks,
        },
    }
}

pub const SERVER: &str = "http://hawkbit:8080/DEFAULT/controller/v1/rpi";

pub fn base(sleep: &str, links: Links) -> BaseResource {
    BaseResource {
        config: ControllerConfig {
            polling: Polling {
                sleep: sleep.to_string(),
            },
        },
        links: Some(links),
    }
}

pub fn link(path: &str) -> Option<Link> {
    Some(Link {
        href: format!("{}/{}", SERVER, path),
    })
}
