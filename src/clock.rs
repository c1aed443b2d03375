use std::time::Duration;

use crate::scheduler::{BackgroundTask, Scheduler, TokioScheduler};

/// Countdown resolution.
pub const TICK: Duration = Duration::from_secs(1);

/// Below this many seconds the UI flags the code as about to expire.
pub const EXPIRING_SOON_SECS: u32 = 60;

/// Signal produced by a running [`SessionClock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// One second elapsed. `remaining` is the value after the decrement.
    Tick { remaining: u32 },
    /// The countdown reached zero. Emitted once, right after the last tick.
    Expired,
}

/// Once-per-second countdown for a QR session.
pub struct SessionClock<S = TokioScheduler> {
    scheduler: S,
    task: Option<BackgroundTask>,
}

impl SessionClock<TokioScheduler> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_scheduler(TokioScheduler)
    }
}

impl Default for SessionClock<TokioScheduler> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Scheduler> SessionClock<S> {
    #[must_use]
    pub fn with_scheduler(scheduler: S) -> Self {
        Self {
            scheduler,
            task: None,
        }
    }

    /// Starts counting down from `initial_seconds`.
    ///
    /// `on_event` receives one [`ClockEvent::Tick`] per second and a single
    /// [`ClockEvent::Expired`] when the count hits zero, after which the clock
    /// stops on its own. Returns `false` without doing anything if the clock
    /// is already running or `initial_seconds` is zero.
    pub fn start<F>(&mut self, initial_seconds: u32, mut on_event: F) -> bool
    where
        F: FnMut(ClockEvent) + Send + 'static,
    {
        if self.is_running() {
            tracing::warn!("session clock already running, ignoring start");
            return false;
        }
        if initial_seconds == 0 {
            tracing::warn!("session clock started with zero seconds, ignoring start");
            return false;
        }

        let scheduler = self.scheduler.clone();
        self.task = Some(BackgroundTask::spawn(move |cancel| async move {
            let mut remaining = initial_seconds;
            while remaining > 0 {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    () = scheduler.sleep(TICK) => {}
                }
                if cancel.is_cancelled() {
                    return;
                }
                remaining -= 1;
                on_event(ClockEvent::Tick { remaining });
            }
            on_event(ClockEvent::Expired);
        }));
        tracing::debug!(initial_seconds, "session clock started");
        true
    }

    /// Halts the countdown. Safe to call any number of times.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop();
            tracing::trace!("session clock stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(BackgroundTask::is_running)
    }
}

/// Formats a countdown as `m:ss`.
#[must_use]
pub fn format_remaining(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[must_use]
pub fn is_expiring_soon(seconds: u32) -> bool {
    seconds < EXPIRING_SOON_SECS
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use tokio::sync::mpsc;

    use super::*;

    fn collector() -> (
        impl FnMut(ClockEvent) + Send + 'static,
        mpsc::UnboundedReceiver<ClockEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            move |ev| {
                let _ = tx.send(ev);
            },
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_then_expires_once() {
        let mut clock = SessionClock::new();
        let (sink, mut rx) = collector();
        assert!(clock.start(3, sink));

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }

        assert_eq!(
            events,
            vec![
                ClockEvent::Tick { remaining: 2 },
                ClockEvent::Tick { remaining: 1 },
                ClockEvent::Tick { remaining: 0 },
                ClockEvent::Expired,
            ]
        );
        assert!(!clock.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn no_tick_before_one_second() {
        let mut clock = SessionClock::new();
        let (sink, mut rx) = collector();
        clock.start(10, sink);

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.try_recv().ok(), Some(ClockEvent::Tick { remaining: 9 }));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_silences_the_clock() {
        let mut clock = SessionClock::new();
        let (sink, mut rx) = collector();
        clock.start(5, sink);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        clock.stop();
        clock.stop();
        clock.stop();
        assert!(!clock.is_running());

        tokio::time::sleep(Duration::from_secs(10)).await;
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert_eq!(
            events,
            vec![
                ClockEvent::Tick { remaining: 4 },
                ClockEvent::Tick { remaining: 3 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_while_running_is_ignored() {
        let mut clock = SessionClock::new();
        let (first, _rx1) = collector();
        let (second, mut rx2) = collector();
        assert!(clock.start(5, first));
        assert!(!clock.start(5, second));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_seconds_is_rejected() {
        let mut clock = SessionClock::new();
        let (sink, _rx) = collector();
        assert!(!clock.start(0, sink));
        assert!(!clock.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn can_restart_after_expiry() {
        let mut clock = SessionClock::new();
        let (sink, mut rx) = collector();
        clock.start(1, sink);
        while rx.recv().await.is_some() {}

        let (sink, mut rx) = collector();
        assert!(clock.start(2, sink));
        assert_eq!(rx.recv().await, Some(ClockEvent::Tick { remaining: 1 }));
    }

    /// Scheduler that never waits, so a full ten minute countdown runs instantly.
    #[derive(Clone)]
    struct Immediate;

    impl Scheduler for Immediate {
        fn sleep(&self, _duration: Duration) -> impl Future<Output = ()> + Send {
            tokio::task::yield_now()
        }
    }

    #[tokio::test]
    async fn injected_scheduler_drives_the_countdown() {
        let mut clock = SessionClock::with_scheduler(Immediate);
        let (sink, mut rx) = collector();
        clock.start(600, sink);

        let mut ticks = 0;
        let mut expired = 0;
        while let Some(ev) = rx.recv().await {
            match ev {
                ClockEvent::Tick { .. } => ticks += 1,
                ClockEvent::Expired => expired += 1,
            }
        }
        assert_eq!(ticks, 600);
        assert_eq!(expired, 1);
    }

    #[test]
    fn countdown_formatting() {
        assert_eq!(format_remaining(600), "10:00");
        assert_eq!(format_remaining(65), "1:05");
        assert_eq!(format_remaining(0), "0:00");
        assert!(is_expiring_soon(59));
        assert!(!is_expiring_soon(60));
    }
}
