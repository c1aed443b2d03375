use std::fmt;

use crate::types::SessionState;

/// Transport-level failure talking to the Ainnect backend.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The server answered but refused the request (non-2xx or `"result": "ERROR"`).
    #[error("{operation} rejected by server: {detail}")]
    Rejected {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response body did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// `true` when the request never got an answer from the server.
    #[must_use]
    pub fn is_network(&self) -> bool {
        match self {
            #[cfg(feature = "http")]
            Self::Http(e) => e.status().is_none() && !e.is_decode(),
            _ => false,
        }
    }
}

/// Why session generation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateFailure {
    Network,
    Rejected,
}

impl fmt::Display for GenerateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Network => "network",
            Self::Rejected => "rejected",
        })
    }
}

/// Errors reported by the QR login flow.
///
/// Every failure inside the clock, the poller or the collaborators is
/// re-classified into one of the first three kinds before an observer sees it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    /// Session creation failed. Retry with `generate()`; the session state is untouched.
    #[error("failed to generate QR session ({kind}): {detail}")]
    GenerateFailed { kind: GenerateFailure, detail: String },

    /// A single status check failed. Polling keeps going.
    #[error("status check failed: {0}")]
    PollTransient(String),

    /// The QR code was confirmed but the token could not be turned into a session.
    #[error("login confirmed but session setup failed: {0}")]
    SessionEstablishFailed(String),

    /// The operation is not valid in the current state.
    #[error("operation not allowed in state {0:?}")]
    InvalidState(Option<SessionState>),
}

impl LoginError {
    pub(crate) fn generate_failed(error: &Error) -> Self {
        let kind = if error.is_network() {
            GenerateFailure::Network
        } else {
            GenerateFailure::Rejected
        };
        Self::GenerateFailed {
            kind,
            detail: error.to_string(),
        }
    }
}
