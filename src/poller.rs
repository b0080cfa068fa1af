//! Async Operation Poller
//!
//! Drives one provider operation from submission to a terminal outcome:
//!
//! ```text
//! Submitted -> Polling -> { Completed(asset) | Failed(error) | TimedOut }
//! ```
//!
//! Synchronous submissions short-circuit straight to `Completed`. Polling runs
//! on tokio timers, so tests can drive it with paused virtual time.

use crate::error::PipelineError;
use crate::provider::{MediaProvider, OperationHandle, PollStatus, RemoteAsset, Submission};
use crate::types::MediaKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Poller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Delay between poll requests (milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Poll request errors tolerated before the operation fails
    #[serde(default = "default_max_poll_errors")]
    pub max_poll_errors: u32,
    /// Total wait budget for image operations (seconds)
    #[serde(default = "default_image_max_wait_secs")]
    pub image_max_wait_secs: u64,
    /// Total wait budget for video operations (seconds)
    #[serde(default = "default_video_max_wait_secs")]
    pub video_max_wait_secs: u64,
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_max_poll_errors() -> u32 {
    5
}

fn default_image_max_wait_secs() -> u64 {
    120
}

fn default_video_max_wait_secs() -> u64 {
    600
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_poll_errors: default_max_poll_errors(),
            image_max_wait_secs: default_image_max_wait_secs(),
            video_max_wait_secs: default_video_max_wait_secs(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_wait(&self, media: MediaKind) -> Duration {
        match media {
            MediaKind::Image => Duration::from_secs(self.image_max_wait_secs),
            MediaKind::Video => Duration::from_secs(self.video_max_wait_secs),
        }
    }
}

/// Poller states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Polling { polls: u32, errors: u32 },
    Completed(RemoteAsset),
    Failed(String),
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Completed(_) | PollState::Failed(_) | PollState::TimedOut
        )
    }
}

/// Terminal outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(RemoteAsset),
    Failed(String),
    TimedOut { waited: Duration },
}

impl PollOutcome {
    /// `TimedOut` and `Failed` are the same thing to the fallback cascade.
    pub fn into_result(self, provider: &str) -> Result<RemoteAsset, PipelineError> {
        match self {
            PollOutcome::Completed(asset) => Ok(asset),
            PollOutcome::Failed(error) => Err(PipelineError::ProviderError(format!(
                "{} operation failed: {}",
                provider, error
            ))),
            PollOutcome::TimedOut { waited } => Err(PipelineError::Timeout(format!(
                "{} operation did not finish within {}s",
                provider,
                waited.as_secs()
            ))),
        }
    }
}

/// A polling loop running on its own task. Dropping it abandons the operation.
pub struct PollTask {
    handle: Option<JoinHandle<PollOutcome>>,
    cancel: Option<oneshot::Sender<()>>,
}

impl PollTask {
    /// Abandon the operation locally. The provider is not notified.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the terminal outcome.
    pub async fn outcome(mut self) -> PollOutcome {
        let Some(handle) = self.handle.take() else {
            return PollOutcome::Failed("poll task already consumed".to_string());
        };
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => PollOutcome::Failed(format!("poll task aborted: {}", e)),
        }
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Operation poller
#[derive(Debug, Clone, Default)]
pub struct OperationPoller {
    config: PollerConfig,
}

impl OperationPoller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Spawn the polling loop for a pending operation.
    pub fn spawn(
        &self,
        provider: Arc<dyn MediaProvider>,
        handle: OperationHandle,
        media: MediaKind,
    ) -> PollTask {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let poller = self.clone();
        let join = tokio::spawn(async move {
            tokio::select! {
                outcome = poller.poll_until_terminal(provider.as_ref(), &handle, media) => outcome,
                _ = cancel_rx => {
                    info!(
                        provider = %handle.provider,
                        reference = %handle.reference,
                        "Operation abandoned locally"
                    );
                    PollOutcome::Failed("operation cancelled".to_string())
                }
            }
        });
        PollTask {
            handle: Some(join),
            cancel: Some(cancel_tx),
        }
    }

    /// Drive a submission to its terminal outcome on the current task.
    pub async fn drive(
        &self,
        provider: &dyn MediaProvider,
        submission: Submission,
        media: MediaKind,
    ) -> PollOutcome {
        match submission {
            Submission::Ready(asset) => PollOutcome::Completed(asset),
            Submission::Pending(handle) => self.poll_until_terminal(provider, &handle, media).await,
        }
    }

    async fn poll_until_terminal(
        &self,
        provider: &dyn MediaProvider,
        handle: &OperationHandle,
        media: MediaKind,
    ) -> PollOutcome {
        let started = Instant::now();
        let max_wait = self.config.max_wait(media);
        let deadline = started + max_wait;
        let mut state = PollState::Submitted;

        debug!(
            provider = %handle.provider,
            reference = %handle.reference,
            max_wait_secs = max_wait.as_secs(),
            "Polling started"
        );

        while !state.is_terminal() {
            let (polls, errors) = match &state {
                PollState::Polling { polls, errors } => (*polls, *errors),
                _ => (0, 0),
            };

            let next_tick = Instant::now() + self.config.interval();
            if next_tick >= deadline {
                tokio::time::sleep_until(deadline).await;
                state = PollState::TimedOut;
                continue;
            }
            tokio::time::sleep_until(next_tick).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            state = match timeout(remaining, provider.poll(handle)).await {
                Err(_) => PollState::TimedOut,
                Ok(Ok(PollStatus::InProgress)) => PollState::Polling {
                    polls: polls + 1,
                    errors,
                },
                Ok(Ok(PollStatus::Completed(asset))) => PollState::Completed(asset),
                Ok(Ok(PollStatus::Failed(error))) => PollState::Failed(error),
                Ok(Err(e)) => {
                    let errors = errors + 1;
                    warn!(
                        provider = %handle.provider,
                        reference = %handle.reference,
                        errors,
                        max_errors = self.config.max_poll_errors,
                        error = %e,
                        "Poll request failed"
                    );
                    if errors >= self.config.max_poll_errors {
                        PollState::Failed(format!(
                            "gave up after {} poll errors, last: {}",
                            errors, e
                        ))
                    } else {
                        PollState::Polling {
                            polls: polls + 1,
                            errors,
                        }
                    }
                }
            };
        }

        let waited = started.elapsed();
        match state {
            PollState::Completed(asset) => {
                info!(
                    provider = %handle.provider,
                    reference = %handle.reference,
                    waited_ms = waited.as_millis(),
                    "Operation completed"
                );
                PollOutcome::Completed(asset)
            }
            PollState::Failed(error) => {
                warn!(
                    provider = %handle.provider,
                    reference = %handle.reference,
                    error = %error,
                    "Operation failed"
                );
                PollOutcome::Failed(error)
            }
            _ => {
                warn!(
                    provider = %handle.provider,
                    reference = %handle.reference,
                    waited_secs = waited.as_secs(),
                    "Operation timed out; abandoning"
                );
                PollOutcome::TimedOut { waited: max_wait }
            }
        }
    }
}
