use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use billing_logging::{billing_debug, billing_info, billing_warn};
use tokio_util::sync::CancellationToken;

use crate::{PollError, TaskOutcome, TaskState, TaskStatus, TaskStatusSource};

const GENERIC_FAILURE: &str = "the task failed without an error message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Status checks before giving up; 150 × 2 s is five minutes.
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150,
        }
    }
}

/// Resolves server tasks to a terminal result.
///
/// One poller runs at most one poll at a time: starting a new one cancels
/// the previous, which then resolves with [`PollError::Superseded`].
pub struct TaskPoller {
    source: Arc<dyn TaskStatusSource>,
    settings: PollSettings,
    current: Mutex<Option<(u64, CancellationToken)>>,
    generation: AtomicU64,
}

impl TaskPoller {
    pub fn new(source: Arc<dyn TaskStatusSource>, settings: PollSettings) -> Self {
        Self {
            source,
            settings,
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    pub async fn poll(&self, task_id: &str) -> Result<TaskOutcome, PollError> {
        self.poll_with_progress(task_id, |_| {}).await
    }

    /// Like [`TaskPoller::poll`], reporting every pending status to `on_pending`.
    pub async fn poll_with_progress<F>(
        &self,
        task_id: &str,
        mut on_pending: F,
    ) -> Result<TaskOutcome, PollError>
    where
        F: FnMut(&TaskStatus) + Send,
    {
        let (generation, token) = self.supersede();
        let result = self.run(task_id, &token, &mut on_pending).await;
        self.release(generation);
        match &result {
            Ok(_) => billing_info!("Task {} finished", task_id),
            Err(PollError::Superseded) => billing_debug!("Poll for task {} superseded", task_id),
            Err(err) => billing_warn!("Task {} did not complete: {}", task_id, err),
        }
        result
    }

    /// Cancels the in-progress poll, if any.
    pub fn cancel(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some((_, token)) = current.take() {
                token.cancel();
            }
        }
    }

    fn supersede(&self) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        if let Ok(mut current) = self.current.lock() {
            if let Some((_, previous)) = current.replace((generation, token.clone())) {
                previous.cancel();
            }
        }
        (generation, token)
    }

    /// Forgets the token of a finished poll unless a newer poll replaced it.
    fn release(&self, generation: u64) {
        if let Ok(mut current) = self.current.lock() {
            if current.as_ref().is_some_and(|(held, _)| *held == generation) {
                *current = None;
            }
        }
    }

    async fn run<F>(
        &self,
        task_id: &str,
        token: &CancellationToken,
        on_pending: &mut F,
    ) -> Result<TaskOutcome, PollError>
    where
        F: FnMut(&TaskStatus) + Send,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let status = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(PollError::Superseded),
                status = self.source.task_status(task_id) => status?,
            };

            match status.state() {
                TaskState::Done => {
                    return Ok(TaskOutcome {
                        task_id: task_id.to_string(),
                        result: status.result,
                        download_url: status.download_url,
                    });
                }
                TaskState::Failed => {
                    let message = status
                        .error
                        .unwrap_or_else(|| GENERIC_FAILURE.to_string());
                    return Err(PollError::Failed(message));
                }
                TaskState::Pending => on_pending(&status),
            }

            if attempts >= max_attempts {
                return Err(PollError::TimedOut { attempts });
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(PollError::Superseded),
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }
    }
}
