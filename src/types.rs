use std::fmt;

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::qr_image::{QrImage, QrImageError};

/// QR login session identifier, issued by the backend.
///
/// Opaque: the backend currently uses UUIDs, but nothing here relies on that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Ainnect user identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Local state of one QR login attempt.
///
/// `Confirmed`, `Expired` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Pending,
    Confirmed,
    Expired,
    Cancelled,
}

impl SessionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Status reported by `GET /api/qr-login/status/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Pending,
    /// The phone scanned the code but the user has not confirmed yet.
    Scanned,
    Confirmed,
    Expired,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// Minimal identity returned with a confirmed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: UserId,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Body of a status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: RemoteStatus,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<UserSummary>,
}

impl StatusResponse {
    #[must_use]
    pub fn pending() -> Self {
        Self {
            status: RemoteStatus::Pending,
            token: None,
            user: None,
        }
    }

    #[must_use]
    pub fn with_status(status: RemoteStatus) -> Self {
        Self {
            status,
            ..Self::pending()
        }
    }

    #[must_use]
    pub fn confirmed(token: impl Into<String>, user: UserSummary) -> Self {
        Self {
            status: RemoteStatus::Confirmed,
            token: Some(token.into()),
            user: Some(user),
        }
    }

    /// The login outcome carried by a `CONFIRMED` status.
    ///
    /// `None` unless the status is `CONFIRMED` with a non-empty token and a user.
    #[must_use]
    pub fn outcome(&self) -> Option<LoginOutcome> {
        if self.status != RemoteStatus::Confirmed {
            return None;
        }
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        let user = self.user.clone()?;
        Some(LoginOutcome {
            token: token.to_owned(),
            user,
        })
    }
}

/// Body of `POST /api/qr-login/generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSession {
    pub session_id: SessionId,
    #[serde(alias = "qrPayload")]
    pub qr_code_data: String,
    #[serde(default)]
    pub qr_code_image: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(alias = "ttlSeconds")]
    pub expires_in_seconds: u32,
}

/// One login attempt, owned by the session machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QrSession {
    pub session_id: SessionId,
    /// Data encoded in the QR code. Display only.
    pub qr_payload: String,
    /// Rendered QR code as a `data:` URL, when the backend sends one.
    pub qr_image: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    pub ttl_seconds: u32,
    pub remaining_seconds: u32,
}

impl QrSession {
    #[must_use]
    pub fn issue(generated: GeneratedSession, issued_at: OffsetDateTime) -> Self {
        Self {
            session_id: generated.session_id,
            qr_payload: generated.qr_code_data,
            qr_image: generated.qr_code_image,
            issued_at,
            ttl_seconds: generated.expires_in_seconds,
            remaining_seconds: generated.expires_in_seconds,
        }
    }

    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.issued_at + time::Duration::seconds(i64::from(self.ttl_seconds))
    }

    /// Decoded QR image, if the backend sent one.
    #[must_use]
    pub fn image(&self) -> Option<Result<QrImage, QrImageError>> {
        self.qr_image.as_deref().map(QrImage::from_data_url)
    }
}

/// Credentials of a confirmed session. Token and user always come together.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub token: String,
    pub user: UserSummary,
}

impl fmt::Debug for LoginOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginOutcome")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

/// User returned by `GET /api/auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Application session established from a QR login token.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub access_token: String,
    pub user: AuthenticatedUser,
    pub established_at: OffsetDateTime,
}

impl fmt::Debug for AuthenticatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedSession")
            .field("access_token", &"<redacted>")
            .field("user", &self.user)
            .field("established_at", &self.established_at)
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_user() -> UserSummary {
    UserSummary {
        user_id: UserId(42),
        username: "linh".into(),
        full_name: Some("Linh Tran".into()),
        avatar_url: None,
        email: Some("linh@example.com".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!SessionState::Pending.is_terminal());
        assert!(SessionState::Confirmed.is_terminal());
        assert!(SessionState::Expired.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
    }

    #[test]
    fn confirmed_status_from_backend_json() {
        let json = r#"{
            "status": "CONFIRMED",
            "token": "tok",
            "user": {"userId": 42, "username": "linh", "fullName": "Linh Tran",
                     "avatarUrl": null, "email": "linh@example.com"}
        }"#;
        let resp: StatusResponse = serde_json::from_str(json).unwrap();
        let outcome = resp.outcome().expect("confirmed with token and user");
        assert_eq!(outcome.token, "tok");
        assert_eq!(outcome.user, test_user());
    }

    #[test]
    fn outcome_requires_token_and_user() {
        let mut resp = StatusResponse::confirmed("tok", test_user());
        resp.user = None;
        assert!(resp.outcome().is_none());

        let mut resp = StatusResponse::confirmed("", test_user());
        assert!(resp.outcome().is_none());
        resp.token = None;
        assert!(resp.outcome().is_none());

        assert!(StatusResponse::pending().outcome().is_none());
    }

    #[test]
    fn scanned_and_unknown_statuses_parse() {
        let scanned: StatusResponse = serde_json::from_str(r#"{"status":"SCANNED"}"#).unwrap();
        assert_eq!(scanned.status, RemoteStatus::Scanned);
        let odd: StatusResponse = serde_json::from_str(r#"{"status":"LOCKED"}"#).unwrap();
        assert_eq!(odd.status, RemoteStatus::Unknown);
    }

    #[test]
    fn generated_session_accepts_both_field_spellings() {
        let backend = r#"{"sessionId":"s1","qrCodeData":"s1",
            "qrCodeImage":"data:image/png;base64,AA==","expiresAt":"2025-01-01T10:10:00",
            "expiresInSeconds":600}"#;
        let g: GeneratedSession = serde_json::from_str(backend).unwrap();
        assert_eq!(g.session_id.as_str(), "s1");
        assert_eq!(g.expires_in_seconds, 600);

        let short = r#"{"sessionId":"s2","qrPayload":"p","ttlSeconds":5}"#;
        let g: GeneratedSession = serde_json::from_str(short).unwrap();
        assert_eq!(g.qr_code_data, "p");
        assert_eq!(g.expires_in_seconds, 5);
        assert!(g.qr_code_image.is_none());
    }

    #[test]
    fn issued_session_counts_down_from_ttl() {
        let g = GeneratedSession {
            session_id: "s1".into(),
            qr_code_data: "s1".into(),
            qr_code_image: None,
            expires_at: None,
            expires_in_seconds: 600,
        };
        let now = OffsetDateTime::UNIX_EPOCH;
        let session = QrSession::issue(g, now);
        assert_eq!(session.remaining_seconds, 600);
        assert_eq!(session.expires_at() - now, time::Duration::minutes(10));
        assert!(session.image().is_none());
    }

    #[test]
    fn issued_session_decodes_backend_image() {
        let json = r#"{"sessionId":"s1","qrCodeData":"s1",
            "qrCodeImage":"data:image/png;base64,iVBORw0KGgo=","expiresInSeconds":600}"#;
        let g: GeneratedSession = serde_json::from_str(json).unwrap();
        let session = QrSession::issue(g, OffsetDateTime::UNIX_EPOCH);
        let image = session.image().unwrap().unwrap();
        assert_eq!(image.media_type(), "image/png");
        assert_eq!(&image.bytes()[1..4], b"PNG");
    }

    #[test]
    fn outcome_debug_hides_token() {
        let outcome = StatusResponse::confirmed("secret-token", test_user())
            .outcome()
            .unwrap();
        assert!(!format!("{outcome:?}").contains("secret-token"));
    }

    #[test]
    fn session_id_from_str() {
        let id = SessionId::from("sess-abc");
        assert_eq!(id.to_string(), "sess-abc");
    }
}
