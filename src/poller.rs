use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::scheduler::{BackgroundTask, Scheduler, TokioScheduler};
use crate::traits::SessionService;
use crate::types::{SessionId, StatusResponse};

/// Delay between status checks used by the Ainnect web client.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound on the backoff doubling exponent.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// When to send the next status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    interval: Duration,
    max_backoff: Option<Duration>,
}

impl PollSchedule {
    /// Poll every `interval`, failures included.
    #[must_use]
    pub const fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_backoff: None,
        }
    }

    /// Double the delay after each consecutive failure, up to `cap`.
    ///
    /// The first successful response resets the delay to the base interval.
    #[must_use]
    pub fn with_backoff(mut self, cap: Duration) -> Self {
        self.max_backoff = Some(cap.max(self.interval));
        self
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn max_backoff(&self) -> Option<Duration> {
        self.max_backoff
    }

    /// Delay before the next check, given how many checks in a row have failed.
    #[must_use]
    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        match self.max_backoff {
            Some(cap) if consecutive_failures > 0 => {
                let factor = 1u32 << consecutive_failures.min(MAX_BACKOFF_EXPONENT);
                self.interval.saturating_mul(factor).min(cap)
            }
            _ => self.interval,
        }
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::fixed(DEFAULT_POLL_INTERVAL)
    }
}

/// Result of one status check.
#[derive(Debug)]
pub enum PollEvent {
    Status(StatusResponse),
    /// The check failed. The poller keeps going.
    Failed(Error),
}

/// Repeatedly asks the backend for the status of one session.
///
/// The poller has no notion of a terminal status: it runs until [`stop`](Self::stop)
/// or until it is restarted for another session.
pub struct StatusPoller<R, S = TokioScheduler> {
    service: Arc<R>,
    scheduler: S,
    task: Option<BackgroundTask>,
}

impl<R: SessionService> StatusPoller<R, TokioScheduler> {
    #[must_use]
    pub fn new(service: Arc<R>) -> Self {
        Self::with_scheduler(service, TokioScheduler)
    }
}

impl<R: SessionService, S: Scheduler> StatusPoller<R, S> {
    #[must_use]
    pub fn with_scheduler(service: Arc<R>, scheduler: S) -> Self {
        Self {
            service,
            scheduler,
            task: None,
        }
    }

    /// Starts polling `session_id`. The first check happens one interval from now.
    ///
    /// A running poller is stopped first, so restarting switches sessions
    /// without overlap.
    pub fn start<F>(&mut self, session_id: SessionId, schedule: PollSchedule, mut on_event: F)
    where
        F: FnMut(PollEvent) + Send + 'static,
    {
        self.stop();

        let service = Arc::clone(&self.service);
        let scheduler = self.scheduler.clone();
        tracing::debug!(session_id = %session_id, interval_ms = schedule.interval().as_millis(), "status polling started");

        self.task = Some(BackgroundTask::spawn(move |cancel| async move {
            let mut failures = 0u32;
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    () = scheduler.sleep(schedule.delay_after(failures)) => {}
                }

                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    result = service.status(&session_id) => result,
                };
                if cancel.is_cancelled() {
                    return;
                }

                match result {
                    Ok(status) => {
                        failures = 0;
                        tracing::trace!(session_id = %session_id, status = ?status.status, "status checked");
                        on_event(PollEvent::Status(status));
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        tracing::debug!(session_id = %session_id, failures, error = %e, "status check failed");
                        on_event(PollEvent::Failed(e));
                    }
                }
            }
        }));
    }

    /// Halts polling. Safe to call any number of times.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop();
            tracing::trace!("status polling stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(BackgroundTask::is_running)
    }
}
