use std::future::Future;
use std::sync::{Mutex, PoisonError};

use crate::error::Error;
use crate::types::{AuthenticatedUser, GeneratedSession, SessionId, StatusResponse};

/// The backend's QR login endpoints.
///
/// [`QrLoginClient`](crate::QrLoginClient) is the HTTP implementation.
pub trait SessionService: Send + Sync + 'static {
    /// Create a new QR login session (`POST /api/qr-login/generate`).
    fn generate(&self) -> impl Future<Output = Result<GeneratedSession, Error>> + Send;

    /// Check the status of a session (`GET /api/qr-login/status/{id}`).
    fn status(
        &self,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<StatusResponse, Error>> + Send;
}

/// Turns a QR login token into an authenticated application session.
///
/// Failures are opaque to the login flow; any error is reported as
/// [`LoginError::SessionEstablishFailed`](crate::LoginError::SessionEstablishFailed).
///
/// # Example
///
/// ```rust,ignore
/// impl AuthSessionService for MyBackend {
///     async fn establish(
///         &self,
///         token: &str,
///     ) -> Result<AuthenticatedUser, Box<dyn std::error::Error + Send + Sync>> {
///         Ok(self.api.me(token).await?)
///     }
/// }
/// ```
pub trait AuthSessionService: Send + Sync + 'static {
    fn establish(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<AuthenticatedUser, Box<dyn std::error::Error + Send + Sync>>>
           + Send;
}

/// Where the access token lives once a QR login is confirmed.
pub trait CredentialStore: Send + Sync + 'static {
    fn store(&self, token: &str);

    fn clear(&self);

    fn load(&self) -> Option<String>;
}

/// In-process [`CredentialStore`].
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn store(&self, token: &str) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_owned());
    }

    fn clear(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn load(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.load(), None);
        store.store("tok");
        assert_eq!(store.load().as_deref(), Some("tok"));
        store.clear();
        assert_eq!(store.load(), None);
    }
}
