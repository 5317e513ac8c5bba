//! Polling supervisor

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::errors::AgentError;

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Delay before polling again after a failed cycle
    pub retry_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(60),
        }
    }
}

/// One poll-and-wait iteration driven by the supervisor
#[async_trait]
pub trait PollCycle: Send {
    async fn run_cycle(&mut self) -> Result<(), AgentError>;

    /// Forget the action in progress so the next poll can pick it up again
    fn clear_action(&mut self);
}

/// Run cycles until `shutdown_signal` resolves
///
/// A failed cycle is logged, releases the action in progress and is retried
/// after `options.retry_delay`.
pub async fn run<C, S, F>(
    options: &Options,
    cycle: &mut C,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    C: PollCycle + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Poller worker starting...");

    loop {
        let outcome = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Poller worker shutting down...");
                return;
            }
            outcome = cycle.run_cycle() => outcome,
        };

        let Err(e) = outcome else {
            continue;
        };

        if e.is_transient() {
            warn!("Polling failed: {}. Retrying in {:?}", e, options.retry_delay);
        } else {
            error!("Polling failed: {}. Retrying in {:?}", e, options.retry_delay);
        }
        cycle.clear_action();

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Poller worker shutting down...");
                return;
            }
            _ = sleep_fn(options.retry_delay) => {}
        }
    }
}
