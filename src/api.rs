use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::Error;
use crate::traits::{AuthSessionService, SessionService};
use crate::types::{AuthenticatedUser, GeneratedSession, SessionId, StatusResponse};

/// Backend used by the Ainnect web client in development.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Per-request timeout applied unless overridden.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Ainnect backend endpoints used by the QR login flow.
///
/// ```rust,ignore
/// use ainnect_qr_login::ApiConfig;
///
/// let config = ApiConfig::new("https://api.ainnect.me".parse()?)
///     .with_request_timeout(Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ApiConfig {
    pub(crate) base_url: Url,
    pub(crate) qr_login_path: Vec<String>,
    pub(crate) current_user_path: Vec<String>,
    pub(crate) request_timeout: Option<Duration>,
}

impl ApiConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            qr_login_path: split_path("/api/qr-login"),
            current_user_path: split_path("/api/auth/me"),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// Override the QR login route prefix (default: `/api/qr-login`).
    #[must_use]
    pub fn with_qr_login_path(mut self, path: &str) -> Self {
        self.qr_login_path = split_path(path);
        self
    }

    /// Override the current-user endpoint (default: `/api/auth/me`).
    #[must_use]
    pub fn with_current_user_path(mut self, path: &str) -> Self {
        self.current_user_path = split_path(path);
        self
    }

    /// Per-request timeout. `None` lets requests run until the session TTL.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    fn endpoint(&self, prefix: &[String], tail: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("base URL cannot hold a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(prefix)
            .extend(tail);
        Ok(url)
    }

    pub(crate) fn generate_url(&self) -> Result<Url, Error> {
        self.endpoint(&self.qr_login_path, &["generate"])
    }

    pub(crate) fn status_url(&self, session_id: &SessionId) -> Result<Url, Error> {
        self.endpoint(&self.qr_login_path, &["status", session_id.as_str()])
    }

    pub(crate) fn current_user_url(&self) -> Result<Url, Error> {
        self.endpoint(&self.current_user_path, &[])
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL.parse().expect("valid default URL"))
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum ResultCode {
    Success,
    Error,
}

/// `{ result, message, data }` wrapper used by the QR login endpoints.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: ResultCode,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self, operation: &'static str) -> Result<T, Error> {
        if self.result == ResultCode::Error {
            return Err(Error::Rejected {
                operation,
                status: None,
                detail: self.message,
            });
        }
        self.data
            .ok_or_else(|| Error::InvalidResponse(format!("{operation}: missing data")))
    }
}

/// Server message from an error body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Envelope<serde_json::Value>>(body)
        .map(|envelope| envelope.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_owned())
}

/// HTTP client for the Ainnect QR login and auth endpoints.
pub struct QrLoginClient {
    config: ApiConfig,
    http: reqwest::Client,
}

impl QrLoginClient {
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Create a QR login session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::Rejected`] if the backend refuses.
    pub async fn generate_session(&self) -> Result<GeneratedSession, Error> {
        let url = self.config.generate_url()?;
        tracing::debug!(%url, "POST QR session");
        let request = self.http.post(url).json(&serde_json::json!({}));
        self.fetch_enveloped(request, "QR session generation").await
    }

    /// Fetch the status of a QR login session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::Rejected`] if the backend refuses.
    pub async fn session_status(&self, session_id: &SessionId) -> Result<StatusResponse, Error> {
        let url = self.config.status_url(session_id)?;
        let request = self.http.get(url);
        let status: StatusResponse = self.fetch_enveloped(request, "QR status check").await?;
        tracing::trace!(
            session_id = %session_id,
            status = ?status.status,
            has_token = status.token.is_some(),
            has_user = status.user.is_some(),
            "QR status received"
        );
        Ok(status)
    }

    /// Fetch the user owning `access_token`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::Rejected`] if the token is not accepted.
    pub async fn current_user(&self, access_token: &str) -> Result<AuthenticatedUser, Error> {
        let url = self.config.current_user_url()?;
        let request = self.http.get(url).bearer_auth(access_token);
        let response = self.send(request).await?;
        let response = Self::ensure_success(response, "current user request").await?;
        response.json::<AuthenticatedUser>().await.map_err(Into::into)
    }

    async fn fetch_enveloped<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<T, Error> {
        let response = self.send(request).await?;
        let response = Self::ensure_success(response, operation).await?;
        response
            .json::<Envelope<T>>()
            .await?
            .into_data(operation)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let request = match self.config.request_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        };
        request.send().await.map_err(Into::into)
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Rejected {
            operation,
            status: Some(status),
            detail: error_detail(&body),
        })
    }
}

impl SessionService for QrLoginClient {
    async fn generate(&self) -> Result<GeneratedSession, Error> {
        self.generate_session().await
    }

    async fn status(&self, session_id: &SessionId) -> Result<StatusResponse, Error> {
        self.session_status(session_id).await
    }
}

impl AuthSessionService for QrLoginClient {
    async fn establish(
        &self,
        token: &str,
    ) -> Result<AuthenticatedUser, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.current_user(token).await?)
    }
}
