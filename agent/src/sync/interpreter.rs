//! Poll response interpretation
//!
//! Each poll fetches the base resource, runs the advertised actions in the
//! order identify, deploy, cancel and then waits the server-suggested delay.
//! Start notifications handed over by the feedback bridge are settled while
//! waiting, so they never overlap with a poll.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveTime, Timelike};
use ddi_models::{BaseResource, Execution, FinishedResult};
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use crate::deploy::notify::{FeedbackInbox, NotifyOutcome};
use crate::deploy::processor::DeploymentProcessor;
use crate::errors::AgentError;
use crate::http::ddi::DdiClient;
use crate::models::action::Action;
use crate::workers::poller::PollCycle;

/// Detail sent back when the server asks to cancel an action
pub const CANCEL_REJECTED_MESSAGE: &str = "Cancelling not supported";

/// Turn a `HH:MM:SS` polling interval into a duration
pub fn parse_sleep(sleep: &str) -> Result<Duration, AgentError> {
    let time = NaiveTime::parse_from_str(sleep.trim(), "%H:%M:%S").map_err(|e| {
        AgentError::ProtocolError(format!("invalid polling interval '{}': {}", sleep, e))
    })?;
    Ok(Duration::from_secs(u64::from(time.num_seconds_from_midnight())))
}

pub struct Interpreter {
    ddi: Arc<dyn DdiClient>,
    processor: DeploymentProcessor,
    inbox: FeedbackInbox,
    attributes: BTreeMap<String, String>,
}

impl Interpreter {
    pub fn new(
        ddi: Arc<dyn DdiClient>,
        processor: DeploymentProcessor,
        inbox: FeedbackInbox,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            ddi,
            processor,
            inbox,
            attributes,
        }
    }

    pub fn processor(&self) -> &DeploymentProcessor {
        &self.processor
    }

    /// Fetch the base resource and run the actions it advertises
    ///
    /// Returns the delay the server wants before the next poll.
    pub async fn poll_once(&mut self) -> Result<Duration, AgentError> {
        let base = self.ddi.fetch_base().await?;
        self.handle(&base).await?;
        parse_sleep(&base.config.polling.sleep)
    }

    async fn handle(&mut self, base: &BaseResource) -> Result<(), AgentError> {
        for action in Action::from_base(base)? {
            debug!("Handling {:?}", action);
            match action {
                Action::Identify => self.identify().await?,
                Action::Deploy { id, resource } => self.processor.process(&id, &resource).await?,
                Action::Cancel { id } => self.cancel(&id).await?,
            }
        }
        Ok(())
    }

    async fn identify(&self) -> Result<(), AgentError> {
        info!("Sending identifying information");
        self.ddi
            .send_config_feedback(Execution::Closed, FinishedResult::Success, &self.attributes)
            .await
    }

    async fn cancel(&self, id: &str) -> Result<(), AgentError> {
        let cancel = self.ddi.fetch_cancel_action(id).await?;
        let stop_id = cancel.cancel_action.stop_id;
        info!("Received cancel request for action {}, rejecting it", stop_id);

        self.ddi
            .send_cancel_feedback(
                &stop_id,
                Execution::Rejected,
                FinishedResult::Success,
                vec![CANCEL_REJECTED_MESSAGE.to_string()],
            )
            .await
    }

    /// Sleep for `delay`, settling start notifications as they arrive
    pub async fn wait(&mut self, delay: Duration) {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = time::sleep_until(deadline) => return,
                outcome = self.inbox.recv() => match outcome {
                    Some(outcome) => self.settle(outcome).await,
                    None => {
                        time::sleep_until(deadline).await;
                        return;
                    }
                },
            }
        }
    }

    /// Settle the notifications already queued, without waiting
    pub async fn settle_pending(&mut self) {
        while let Some(outcome) = self.inbox.try_recv() {
            self.settle(outcome).await;
        }
    }

    async fn settle(&self, outcome: NotifyOutcome) {
        let container = outcome.update.name.clone();
        if let Err(e) = self.processor.settle(outcome).await {
            error!("Sending the start feedback of {} failed: {}", container, e);
        }
    }
}

#[async_trait]
impl PollCycle for Interpreter {
    async fn run_cycle(&mut self) -> Result<(), AgentError> {
        // verdicts that arrived during a retry delay
        self.settle_pending().await;

        let delay = self.poll_once().await?;
        info!("Will sleep for {:?}", delay);
        self.wait(delay).await;
        Ok(())
    }

    fn clear_action(&mut self) {
        self.processor.clear_action();
    }
}
