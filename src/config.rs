use std::time::Duration;

use url::Url;

use crate::api::{ApiConfig, QrLoginClient};
use crate::error::Error;
use crate::poller::PollSchedule;

/// QR login client configuration.
///
/// Use [`from_env()`](QrLoginConfig::from_env) for convention-based setup,
/// or [`new()`](QrLoginConfig::new) with `with_*` methods for full control.
#[derive(Debug, Clone, Default)]
pub struct QrLoginConfig {
    api: ApiConfig,
    poll: PollSchedule,
}

impl QrLoginConfig {
    /// Create config for the given backend. Polls every two seconds.
    #[must_use]
    pub fn new(api: ApiConfig) -> Self {
        Self {
            api,
            poll: PollSchedule::default(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `AINNECT_API_URL`: Backend base URL (default `http://localhost:8080`)
    /// - `AINNECT_HTTP_TIMEOUT_SECS`: Per-request timeout, `0` disables it (default 10)
    /// - `AINNECT_QR_POLL_INTERVAL_MS`: Delay between status checks (default 2000)
    /// - `AINNECT_QR_POLL_MAX_BACKOFF_MS`: Enables exponential backoff on failed checks, capped here
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env()`](QrLoginConfig::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut api = ApiConfig::default();

        if let Some(url_str) = lookup("AINNECT_API_URL") {
            let url: Url = url_str
                .parse()
                .map_err(|e| Error::Config(format!("AINNECT_API_URL: {e}")))?;
            if url.cannot_be_a_base() {
                return Err(Error::Config(format!(
                    "AINNECT_API_URL: not a base URL: {url}"
                )));
            }
            api = ApiConfig::new(url);
        }
        if let Some(secs) = lookup("AINNECT_HTTP_TIMEOUT_SECS") {
            let secs = parse_number("AINNECT_HTTP_TIMEOUT_SECS", &secs)?;
            let timeout = (secs > 0).then(|| Duration::from_secs(secs));
            api = api.with_request_timeout(timeout);
        }

        let mut poll = PollSchedule::default();
        if let Some(ms) = lookup("AINNECT_QR_POLL_INTERVAL_MS") {
            let ms = parse_number("AINNECT_QR_POLL_INTERVAL_MS", &ms)?;
            if ms == 0 {
                return Err(Error::Config(
                    "AINNECT_QR_POLL_INTERVAL_MS must be greater than zero".into(),
                ));
            }
            poll = PollSchedule::fixed(Duration::from_millis(ms));
        }
        if let Some(ms) = lookup("AINNECT_QR_POLL_MAX_BACKOFF_MS") {
            let ms = parse_number("AINNECT_QR_POLL_MAX_BACKOFF_MS", &ms)?;
            poll = poll.with_backoff(Duration::from_millis(ms));
        }

        tracing::debug!(
            base_url = %api.base_url(),
            timeout = ?api.request_timeout(),
            poll_interval = ?poll.interval(),
            max_backoff = ?poll.max_backoff(),
            "QR login config loaded"
        );

        Ok(Self { api, poll })
    }

    #[must_use]
    pub fn with_poll_schedule(mut self, poll: PollSchedule) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    #[must_use]
    pub fn poll_schedule(&self) -> PollSchedule {
        self.poll
    }

    /// HTTP client for the configured backend.
    #[must_use]
    pub fn client(&self) -> QrLoginClient {
        QrLoginClient::new(self.api.clone())
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, Error> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}: {e}")))
}
