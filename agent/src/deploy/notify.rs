//! Container start notifications
//!
//! A container that asks for start feedback gets a Unix socket named after
//! it. Its unit writes one line `<result> <exit code> <exit status>` to the
//! socket once it started (or failed to). Each socket is served by its own
//! task; the verdict is handed back to the polling context through a
//! [`FeedbackSubmitter`] so that rollback and feedback never race a poll.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::UnixListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::{fs, time};
use tracing::{debug, error, info, warn};

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::models::deployment::ChunkUpdate;

/// Socket file name prefix, followed by the container name
pub const SOCKET_PREFIX: &str = "fullmetalupdate_notify_";

/// Largest notification accepted
pub const MAX_MESSAGE_LEN: usize = 1024;

/// What a container reported about its start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyResult {
    Success,

    /// The unit reported a failure
    Failed {
        service_result: String,
        exit_code: String,
        exit_status: String,
    },

    /// Nothing arrived before the session timeout
    TimedOut,

    /// The socket broke before a message could be read
    ChannelError(String),
}

impl NotifyResult {
    /// Interpret one raw notification
    ///
    /// Anything whose first word is not `success` is a failure, including an
    /// empty message.
    pub fn parse(message: &[u8]) -> Self {
        let text = String::from_utf8_lossy(message);
        let mut fields = text.split_whitespace();

        let service_result = match fields.next() {
            Some("success") => return NotifyResult::Success,
            Some(first) => first.to_string(),
            None => "empty notification".to_string(),
        };

        let mut field = || fields.next().unwrap_or("unknown").to_string();
        let exit_code = field();
        let exit_status = field();

        NotifyResult::Failed {
            service_result,
            exit_code,
            exit_status,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, NotifyResult::Success)
    }

    /// Feedback text describing how `container` started
    pub fn describe(&self, container: &str) -> String {
        match self {
            NotifyResult::Success => format!("Container {} started successfully", container),
            NotifyResult::Failed {
                service_result,
                exit_code,
                exit_status,
            } => format!(
                "Container {} failed to start with result:\n\tSERVICE_RESULT={}\n\tEXIT_CODE={}\n\tEXIT_STATUS={}",
                container, service_result, exit_code, exit_status
            ),
            NotifyResult::TimedOut => {
                format!("Container {} failed to start: the socket timed out.", container)
            }
            NotifyResult::ChannelError(e) => format!(
                "Container {} failed to start: the notification channel failed ({})",
                container, e
            ),
        }
    }
}

/// Verdict of one session, addressed to the action that opened it
#[derive(Debug, Clone)]
pub struct NotifyOutcome {
    pub action_id: String,
    pub update: ChunkUpdate,
    pub result: NotifyResult,
}

/// Thread-safe entry point used by sessions to hand their verdict over
#[derive(Debug, Clone)]
pub struct FeedbackSubmitter {
    tx: mpsc::UnboundedSender<NotifyOutcome>,
}

impl FeedbackSubmitter {
    pub fn submit(&self, outcome: NotifyOutcome) -> Result<(), AgentError> {
        self.tx
            .send(outcome)
            .map_err(|_| AgentError::NotifyError("feedback inbox is closed".to_string()))
    }
}

/// Receiving side, drained by the polling context
#[derive(Debug)]
pub struct FeedbackInbox {
    rx: mpsc::UnboundedReceiver<NotifyOutcome>,
}

impl FeedbackInbox {
    /// Wait for the next verdict, `None` once every submitter is gone
    pub async fn recv(&mut self) -> Option<NotifyOutcome> {
        self.rx.recv().await
    }

    /// Next verdict if one is already queued
    pub fn try_recv(&mut self) -> Option<NotifyOutcome> {
        self.rx.try_recv().ok()
    }
}

pub fn feedback_channel() -> (FeedbackSubmitter, FeedbackInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FeedbackSubmitter { tx }, FeedbackInbox { rx })
}

/// Removes the socket file when the session ends
struct SocketGuard {
    path: PathBuf,
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        info!("Removing socket {}", self.path.display());
        if let Err(e) = std::fs::remove_file(&self.path) {
            error!("Error while removing socket {} ({})", self.path.display(), e);
        }
    }
}

/// One listening socket waiting for exactly one notification
pub struct NotifySession {
    listener: UnixListener,
    timeout: Duration,
    _guard: SocketGuard,
}

impl NotifySession {
    /// Bind a fresh socket at `path`, replacing a stale one
    pub async fn bind(path: &Path, timeout: Duration) -> Result<Self, AgentError> {
        match fs::remove_file(path).await {
            Ok(()) => debug!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!("Creating socket {}", path.display());
        let listener = UnixListener::bind(path)
            .map_err(|e| AgentError::NotifyError(format!("bind {}: {}", path.display(), e)))?;

        Ok(Self {
            listener,
            timeout,
            _guard: SocketGuard {
                path: path.to_path_buf(),
            },
        })
    }

    /// Wait for the notification, then remove the socket
    pub async fn wait(self) -> NotifyResult {
        match time::timeout(self.timeout, receive(&self.listener)).await {
            Ok(Ok(message)) => {
                debug!("Notification received: {:?}", String::from_utf8_lossy(&message));
                NotifyResult::parse(&message)
            }
            Ok(Err(e)) => NotifyResult::ChannelError(e.to_string()),
            Err(_) => NotifyResult::TimedOut,
        }
    }
}

async fn receive(listener: &UnixListener) -> std::io::Result<Vec<u8>> {
    let (mut stream, _) = listener.accept().await?;
    let mut buf = vec![0u8; MAX_MESSAGE_LEN];
    let len = stream.read(&mut buf).await?;
    buf.truncate(len);
    Ok(buf)
}

/// Opens sessions and runs each on its own task
pub struct FeedbackBridge {
    socket_dir: Dir,
    default_timeout: Duration,
    submitter: FeedbackSubmitter,
    sessions: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl FeedbackBridge {
    pub fn new(socket_dir: Dir, default_timeout: Duration, submitter: FeedbackSubmitter) -> Self {
        Self {
            socket_dir,
            default_timeout,
            submitter,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn socket_path(&self, container: &str) -> PathBuf {
        self.socket_dir
            .file(&format!("{}{}.sock", SOCKET_PREFIX, container))
            .path()
            .to_path_buf()
    }

    /// Start waiting for the start notification of `update`
    ///
    /// A session still waiting for the same container is cancelled first.
    pub async fn open(&self, action_id: &str, update: &ChunkUpdate) -> Result<(), AgentError> {
        let timeout = update
            .app_options()
            .and_then(|options| options.timeout)
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(self.default_timeout);

        let mut sessions = self.sessions.lock().await;
        if let Some(previous) = sessions.remove(&update.name) {
            if !previous.is_finished() {
                warn!("Cancelling the pending notification session of {}", update.name);
                previous.abort();
                let _ = previous.await;
            }
        }

        self.socket_dir.create().await?;
        let session = NotifySession::bind(&self.socket_path(&update.name), timeout).await?;

        let submitter = self.submitter.clone();
        let action_id = action_id.to_string();
        let update = update.clone();
        let name = update.name.clone();

        info!("Waiting up to {:?} for {} to report its start", timeout, name);
        let handle = tokio::spawn(async move {
            let result = session.wait().await;
            debug!("Notification session of {} ended: {:?}", update.name, result);

            let outcome = NotifyOutcome {
                action_id,
                update,
                result,
            };
            if let Err(e) = submitter.submit(outcome) {
                error!("Dropping start notification: {}", e);
            }
        });

        sessions.insert(name, handle);
        Ok(())
    }

    /// Let the sessions still waiting end on their own, for at most `grace`
    ///
    /// Returns how many were still waiting when `grace` ran out.
    pub async fn drain(&self, grace: Duration) -> usize {
        let deadline = time::Instant::now() + grace;
        let mut sessions = self.sessions.lock().await;
        let mut pending = 0;
        for (name, mut handle) in sessions.drain() {
            match time::timeout_at(deadline, &mut handle).await {
                Ok(_) => debug!("Notification session of {} ended", name),
                Err(_) => {
                    warn!("Notification session of {} still waiting at shutdown", name);
                    pending += 1;
                }
            }
        }
        pending
    }
}
