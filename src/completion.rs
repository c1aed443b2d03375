use std::sync::Arc;

use time::OffsetDateTime;

use crate::error::LoginError;
use crate::traits::{AuthSessionService, CredentialStore, MemoryCredentialStore};
use crate::types::{AuthenticatedSession, LoginOutcome};

/// Exchanges the token of a confirmed QR session for an application session.
///
/// The handler does not guard against repeated calls; the session machine
/// calls it once, on its single transition into `Confirmed`.
pub struct LoginCompletionHandler<A, C = MemoryCredentialStore> {
    auth: Arc<A>,
    credentials: Arc<C>,
}

impl<A: AuthSessionService> LoginCompletionHandler<A, MemoryCredentialStore> {
    #[must_use]
    pub fn new(auth: Arc<A>) -> Self {
        Self::with_credential_store(auth, Arc::new(MemoryCredentialStore::new()))
    }
}

impl<A: AuthSessionService, C: CredentialStore> LoginCompletionHandler<A, C> {
    #[must_use]
    pub fn with_credential_store(auth: Arc<A>, credentials: Arc<C>) -> Self {
        Self { auth, credentials }
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<C> {
        &self.credentials
    }

    /// Stores the token, then establishes the session with it.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::SessionEstablishFailed`] if the authentication
    /// service rejects the token. The stored token is cleared and nothing is retried.
    pub async fn complete(
        &self,
        outcome: &LoginOutcome,
    ) -> Result<AuthenticatedSession, LoginError> {
        tracing::info!(
            user_id = %outcome.user.user_id,
            username = %outcome.user.username,
            token_len = outcome.token.len(),
            "QR login confirmed, establishing session"
        );

        self.credentials.store(&outcome.token);

        match self.auth.establish(&outcome.token).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, username = %user.username, "QR login successful");
                Ok(AuthenticatedSession {
                    access_token: outcome.token.clone(),
                    user,
                    established_at: OffsetDateTime::now_utc(),
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "Session establishment after QR login failed");
                self.credentials.clear();
                Err(LoginError::SessionEstablishFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAuthService;
    use crate::types::{StatusResponse, test_user};

    fn outcome() -> LoginOutcome {
        StatusResponse::confirmed("tok", test_user())
            .outcome()
            .unwrap()
    }

    #[tokio::test]
    async fn success_keeps_token_and_returns_session() {
        let auth = Arc::new(FakeAuthService::new());
        let handler = LoginCompletionHandler::new(Arc::clone(&auth));

        let session = handler.complete(&outcome()).await.unwrap();

        assert_eq!(session.access_token, "tok");
        assert_eq!(session.user.username, "linh");
        assert_eq!(handler.credentials().load().as_deref(), Some("tok"));
        assert_eq!(auth.tokens(), vec!["tok".to_string()]);
    }

    #[tokio::test]
    async fn failure_clears_token() {
        let auth = Arc::new(FakeAuthService::failing());
        let handler = LoginCompletionHandler::new(Arc::clone(&auth));

        let err = handler.complete(&outcome()).await.unwrap_err();

        assert!(matches!(err, LoginError::SessionEstablishFailed(_)));
        assert_eq!(handler.credentials().load(), None);
        assert_eq!(auth.calls(), 1);
    }
}
