//! QR login session state machine.
//!
//! The machine owns one [`QrSession`] and its [`SessionState`]. Clock ticks and
//! poll results never touch that state directly: the clock and poller tasks
//! push tagged signals onto one queue, and [`QrSessionMachine::step`] applies
//! them in order on the caller's task.
//!
//! ```text
//!  (none) --generate--> PENDING --status CONFIRMED + token--> CONFIRMED
//!                          |------clock expiry / EXPIRED---> EXPIRED  --refresh--> PENDING
//!                          '------status CANCELLED--------> CANCELLED --refresh--> PENDING
//! ```
//!
//! Signals that arrive together are applied with a confirmation first, so a
//! confirmation is never lost to an expiry tick in the same step. Once a
//! terminal state is reached every later signal is dropped, except the result
//! of the token exchange started by the confirmation. That exchange runs as its
//! own task and reports back through the same queue, so dropping a `step()`
//! future never loses it.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};

use crate::clock::{ClockEvent, SessionClock};
use crate::completion::LoginCompletionHandler;
use crate::error::LoginError;
use crate::poller::{PollEvent, PollSchedule, StatusPoller};
use crate::scheduler::{BackgroundTask, Scheduler, TokioScheduler};
use crate::traits::{AuthSessionService, CredentialStore, MemoryCredentialStore, SessionService};
use crate::types::{
    AuthenticatedSession, LoginOutcome, QrSession, RemoteStatus, SessionId, SessionState,
};

/// Read-only view of the machine pushed to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: Option<SessionState>,
    pub session_id: Option<SessionId>,
    pub remaining_seconds: u32,
    pub ttl_seconds: u32,
}

/// Observer-facing event produced by [`QrSessionMachine::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginEvent {
    /// The countdown moved.
    Tick { remaining: u32 },
    StateChanged(SessionState),
    /// The confirmed token was turned into an application session.
    LoggedIn(AuthenticatedSession),
    Failed(LoginError),
}

/// How a login attempt ended, as returned by [`QrSessionMachine::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    LoggedIn(AuthenticatedSession),
    Expired,
    Cancelled,
}

#[derive(Debug)]
enum SignalKind {
    Clock(ClockEvent),
    Poll(PollEvent),
    Completed(Result<AuthenticatedSession, LoginError>),
}

impl SignalKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Clock(ClockEvent::Tick { .. }) => "tick",
            Self::Clock(ClockEvent::Expired) => "expiry",
            Self::Poll(PollEvent::Status(_)) => "status",
            Self::Poll(PollEvent::Failed(_)) => "poll failure",
            Self::Completed(_) => "completion",
        }
    }
}

#[derive(Debug)]
struct Signal {
    generation: u64,
    kind: SignalKind,
}

impl Signal {
    fn is_confirmation(&self) -> bool {
        matches!(
            &self.kind,
            SignalKind::Poll(PollEvent::Status(status)) if status.outcome().is_some()
        )
    }
}

/// Orders one batch of queued signals: confirmations first, otherwise arrival order.
fn prioritize(mut batch: Vec<Signal>) -> Vec<Signal> {
    batch.sort_by_key(|signal| !signal.is_confirmation());
    batch
}

/// Drives one QR login attempt at a time.
pub struct QrSessionMachine<R, A, C = MemoryCredentialStore, S = TokioScheduler> {
    service: Arc<R>,
    completion: Arc<LoginCompletionHandler<A, C>>,
    completing: Option<BackgroundTask>,
    clock: SessionClock<S>,
    poller: StatusPoller<R, S>,
    schedule: PollSchedule,
    session: Option<QrSession>,
    state: Option<SessionState>,
    generation: u64,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals_rx: mpsc::UnboundedReceiver<Signal>,
    events: VecDeque<LoginEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<R, A, C> QrSessionMachine<R, A, C, TokioScheduler>
where
    R: SessionService,
    A: AuthSessionService,
    C: CredentialStore,
{
    #[must_use]
    pub fn new(service: Arc<R>, completion: LoginCompletionHandler<A, C>) -> Self {
        Self::with_scheduler(service, completion, TokioScheduler)
    }
}

impl<R, A, C, S> QrSessionMachine<R, A, C, S>
where
    R: SessionService,
    A: AuthSessionService,
    C: CredentialStore,
    S: Scheduler,
{
    #[must_use]
    pub fn with_scheduler(
        service: Arc<R>,
        completion: LoginCompletionHandler<A, C>,
        scheduler: S,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            poller: StatusPoller::with_scheduler(Arc::clone(&service), scheduler.clone()),
            clock: SessionClock::with_scheduler(scheduler),
            service,
            completion: Arc::new(completion),
            completing: None,
            schedule: PollSchedule::default(),
            session: None,
            state: None,
            generation: 0,
            signals_tx,
            signals_rx,
            events: VecDeque::new(),
            snapshot,
        }
    }

    /// Override the status polling schedule (default: every two seconds).
    #[must_use]
    pub fn with_poll_schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Current state, `None` before the first successful `generate()`.
    #[must_use]
    pub fn state(&self) -> Option<SessionState> {
        self.state
    }

    #[must_use]
    pub fn session(&self) -> Option<&QrSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn completion(&self) -> &LoginCompletionHandler<A, C> {
        &self.completion
    }

    /// `true` while the token of a confirmed session is being exchanged.
    #[must_use]
    pub fn is_completing(&self) -> bool {
        self.completing.as_ref().is_some_and(BackgroundTask::is_running)
    }

    /// Receiver of state snapshots. Every change is published after clock and
    /// poller have been stopped for it.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    #[must_use]
    pub fn is_counting_down(&self) -> bool {
        self.clock.is_running()
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    /// Requests a new QR session and enters `Pending`.
    ///
    /// # Errors
    ///
    /// - [`LoginError::InvalidState`] if a session already exists; use [`refresh`](Self::refresh).
    /// - [`LoginError::GenerateFailed`] if the backend call fails. The machine
    ///   stays without a session and `generate()` may be retried.
    pub async fn generate(&mut self) -> Result<&QrSession, LoginError> {
        if self.state.is_some() {
            tracing::warn!(state = ?self.state, "generate called with a live session");
            return Err(LoginError::InvalidState(self.state));
        }

        let generated = self.service.generate().await.map_err(|e| {
            tracing::warn!(error = %e, "QR session generation failed");
            LoginError::generate_failed(&e)
        })?;

        self.generation += 1;
        let session = QrSession::issue(generated, OffsetDateTime::now_utc());
        tracing::info!(
            session_id = %session.session_id,
            ttl_seconds = session.ttl_seconds,
            "QR session generated"
        );

        let ttl = session.ttl_seconds;
        let session_id = session.session_id.clone();
        self.session = Some(session);
        self.state = Some(SessionState::Pending);
        self.events
            .push_back(LoginEvent::StateChanged(SessionState::Pending));

        if ttl == 0 {
            self.finish(SessionState::Expired);
        } else {
            self.start_timers(session_id, ttl);
            self.publish();
        }

        self.session
            .as_ref()
            .ok_or(LoginError::InvalidState(self.state))
    }

    /// Discards an expired or cancelled session and generates a fresh one.
    ///
    /// # Errors
    ///
    /// - [`LoginError::InvalidState`] while `Pending` or after `Confirmed`.
    /// - [`LoginError::GenerateFailed`] as for [`generate`](Self::generate); the
    ///   old session is gone either way.
    pub async fn refresh(&mut self) -> Result<&QrSession, LoginError> {
        if matches!(
            self.state,
            Some(SessionState::Pending | SessionState::Confirmed)
        ) {
            tracing::warn!(state = ?self.state, "refresh called on a session that is not finished");
            return Err(LoginError::InvalidState(self.state));
        }
        self.discard();
        self.generate().await
    }

    /// Stops the countdown and polling and forgets the current session.
    ///
    /// No terminal state is reported; the machine is left ready for `generate()`.
    pub fn close(&mut self) {
        if self.session.is_some() {
            tracing::debug!(state = ?self.state, "QR session closed");
        }
        self.discard();
    }

    /// Waits for and returns the next observer event.
    ///
    /// Returns `None` once there is nothing left to wait for: no session, or
    /// a terminal state whose events have all been handed out.
    ///
    /// Cancel-safe: dropping the returned future loses no signal and does not
    /// interrupt a token exchange in progress.
    pub async fn step(&mut self) -> Option<LoginEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            let live = self.state.is_some_and(|state| !state.is_terminal());
            if !live && self.completing.is_none() {
                return None;
            }

            let first = self.signals_rx.recv().await?;
            let mut batch = vec![first];
            while let Ok(signal) = self.signals_rx.try_recv() {
                batch.push(signal);
            }
            for signal in prioritize(batch) {
                self.dispatch(signal);
            }
        }
    }

    /// Drives the current session to its end.
    ///
    /// # Errors
    ///
    /// - [`LoginError::SessionEstablishFailed`] if the QR code was confirmed
    ///   but the session could not be set up.
    /// - [`LoginError::InvalidState`] if there is no session to run.
    pub async fn run(&mut self) -> Result<SessionEnd, LoginError> {
        while let Some(event) = self.step().await {
            match event {
                LoginEvent::LoggedIn(session) => return Ok(SessionEnd::LoggedIn(session)),
                LoginEvent::Failed(e) => return Err(e),
                LoginEvent::Tick { .. } | LoginEvent::StateChanged(_) => {}
            }
        }
        match self.state {
            Some(SessionState::Expired) => Ok(SessionEnd::Expired),
            Some(SessionState::Cancelled) => Ok(SessionEnd::Cancelled),
            state => Err(LoginError::InvalidState(state)),
        }
    }

    fn start_timers(&mut self, session_id: SessionId, ttl: u32) {
        let generation = self.generation;

        let tx = self.signals_tx.clone();
        self.clock.start(ttl, move |event| {
            let _ = tx.send(Signal {
                generation,
                kind: SignalKind::Clock(event),
            });
        });

        let tx = self.signals_tx.clone();
        self.poller.start(session_id, self.schedule, move |event| {
            let _ = tx.send(Signal {
                generation,
                kind: SignalKind::Poll(event),
            });
        });
    }

    fn stop_timers(&mut self) {
        self.clock.stop();
        self.poller.stop();
    }

    fn discard(&mut self) {
        self.stop_timers();
        if let Some(task) = self.completing.take() {
            task.stop();
        }
        self.generation += 1;
        self.session = None;
        self.state = None;
        self.events.clear();
        while self.signals_rx.try_recv().is_ok() {}
        self.publish();
    }

    fn dispatch(&mut self, signal: Signal) {
        if signal.generation != self.generation {
            tracing::trace!(signal = signal.kind.label(), "dropping signal from a previous session");
            return;
        }
        if let SignalKind::Completed(result) = signal.kind {
            self.completing = None;
            self.events.push_back(match result {
                Ok(session) => LoginEvent::LoggedIn(session),
                Err(e) => LoginEvent::Failed(e),
            });
            return;
        }
        if self.state.is_none_or(SessionState::is_terminal) {
            tracing::trace!(state = ?self.state, signal = signal.kind.label(), "dropping signal after terminal state");
            return;
        }

        match signal.kind {
            SignalKind::Clock(ClockEvent::Tick { remaining }) => {
                if let Some(session) = self.session.as_mut() {
                    session.remaining_seconds = remaining;
                }
                self.events.push_back(LoginEvent::Tick { remaining });
                if remaining == 0 {
                    tracing::info!(session_id = ?self.session_id(), "QR session expired");
                    self.finish(SessionState::Expired);
                } else {
                    self.publish();
                }
            }
            SignalKind::Clock(ClockEvent::Expired) => {
                tracing::info!(session_id = ?self.session_id(), "QR session expired");
                self.finish(SessionState::Expired);
            }
            SignalKind::Poll(PollEvent::Failed(e)) => {
                let error = LoginError::PollTransient(e.to_string());
                tracing::warn!(session_id = ?self.session_id(), error = %error, "ignoring failed status check");
            }
            SignalKind::Poll(PollEvent::Status(status)) => match status.status {
                RemoteStatus::Confirmed => match status.outcome() {
                    Some(outcome) => self.confirm(outcome),
                    None => tracing::warn!(
                        session_id = ?self.session_id(),
                        has_token = status.token.is_some(),
                        has_user = status.user.is_some(),
                        "confirmed status without credentials, still waiting"
                    ),
                },
                RemoteStatus::Expired => {
                    tracing::info!(session_id = ?self.session_id(), "QR session expired on server");
                    self.finish(SessionState::Expired);
                }
                RemoteStatus::Cancelled => {
                    tracing::info!(session_id = ?self.session_id(), "QR login cancelled");
                    self.finish(SessionState::Cancelled);
                }
                RemoteStatus::Pending | RemoteStatus::Scanned => {}
                RemoteStatus::Unknown => {
                    tracing::warn!(session_id = ?self.session_id(), "unknown QR session status");
                }
            },
            // Handled before the terminal-state check above.
            SignalKind::Completed(_) => {}
        }
    }

    /// Enters `Confirmed` and starts the token exchange.
    fn confirm(&mut self, outcome: LoginOutcome) {
        self.finish(SessionState::Confirmed);

        let completion = Arc::clone(&self.completion);
        let tx = self.signals_tx.clone();
        let generation = self.generation;
        self.completing = Some(BackgroundTask::spawn(move |cancel| async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!("QR session closed during token exchange, clearing credentials");
                    completion.credentials().clear();
                }
                result = completion.complete(&outcome) => {
                    let _ = tx.send(Signal {
                        generation,
                        kind: SignalKind::Completed(result),
                    });
                }
            }
        }));
    }

    /// Enters a terminal state. Timers are stopped before anyone hears about it.
    fn finish(&mut self, state: SessionState) {
        self.stop_timers();
        self.state = Some(state);
        self.events.push_back(LoginEvent::StateChanged(state));
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(SessionSnapshot {
            state: self.state,
            session_id: self.session_id().cloned(),
            remaining_seconds: self.session.as_ref().map_or(0, |s| s.remaining_seconds),
            ttl_seconds: self.session.as_ref().map_or(0, |s| s.ttl_seconds),
        });
    }

    fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|s| &s.session_id)
    }
}
