//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::Error;
use crate::traits::{AuthSessionService, SessionService};
use crate::types::{AuthenticatedUser, GeneratedSession, SessionId, StatusResponse, UserId};

fn rejected(operation: &'static str) -> Error {
    Error::Rejected {
        operation,
        status: Some(500),
        detail: "scripted failure".into(),
    }
}

/// Scripted QR login backend.
///
/// `generate` hands out queued sessions, falling back to `s<n>` with a ten
/// minute TTL. `status` pops queued responses and answers `PENDING` when empty.
#[derive(Default)]
pub(crate) struct FakeSessionService {
    sessions: Mutex<VecDeque<Result<GeneratedSession, Error>>>,
    statuses: Mutex<VecDeque<Result<StatusResponse, Error>>>,
    generated: Mutex<u32>,
    polls: Mutex<HashMap<String, usize>>,
}

impl FakeSessionService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_session(&self, id: &str, ttl_seconds: u32) {
        self.sessions.lock().unwrap().push_back(Ok(GeneratedSession {
            session_id: id.into(),
            qr_code_data: id.into(),
            qr_code_image: None,
            expires_at: None,
            expires_in_seconds: ttl_seconds,
        }));
    }

    pub(crate) fn push_generate_error(&self) {
        self.sessions
            .lock()
            .unwrap()
            .push_back(Err(rejected("generate")));
    }

    pub(crate) fn push_status(&self, status: StatusResponse) {
        self.statuses.lock().unwrap().push_back(Ok(status));
    }

    pub(crate) fn push_status_error(&self) {
        self.statuses
            .lock()
            .unwrap()
            .push_back(Err(rejected("status check")));
    }

    pub(crate) fn polls_for(&self, id: &str) -> usize {
        self.polls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub(crate) fn generate_calls(&self) -> u32 {
        *self.generated.lock().unwrap()
    }
}

impl SessionService for FakeSessionService {
    async fn generate(&self) -> Result<GeneratedSession, Error> {
        let n = {
            let mut generated = self.generated.lock().unwrap();
            *generated += 1;
            *generated
        };
        let scripted = self.sessions.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            let id = format!("s{n}");
            Ok(GeneratedSession {
                session_id: SessionId(id.clone()),
                qr_code_data: id,
                qr_code_image: None,
                expires_at: None,
                expires_in_seconds: 600,
            })
        })
    }

    async fn status(&self, session_id: &SessionId) -> Result<StatusResponse, Error> {
        *self
            .polls
            .lock()
            .unwrap()
            .entry(session_id.as_str().to_owned())
            .or_default() += 1;
        let scripted = self.statuses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(StatusResponse::pending()))
    }
}

/// Authentication service that records every token it sees.
#[derive(Default)]
pub(crate) struct FakeAuthService {
    fail: bool,
    delay: Option<Duration>,
    tokens: Mutex<Vec<String>>,
}

impl FakeAuthService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Takes `delay` to answer each `establish` call.
    pub(crate) fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub(crate) fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

impl AuthSessionService for FakeAuthService {
    async fn establish(
        &self,
        token: &str,
    ) -> Result<AuthenticatedUser, Box<dyn std::error::Error + Send + Sync>> {
        self.tokens.lock().unwrap().push(token.to_owned());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err("token rejected".into());
        }
        Ok(AuthenticatedUser {
            id: UserId(42),
            username: "linh".into(),
            email: Some("linh@example.com".into()),
            display_name: Some("Linh Tran".into()),
            avatar_url: None,
        })
    }
}
