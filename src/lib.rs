#![doc = include_str!("../README.md")]

#[cfg(feature = "http")]
pub mod api;
pub mod clock;
pub mod completion;
#[cfg(feature = "http")]
pub mod config;
pub mod error;
pub mod machine;
pub mod poller;
pub mod qr_image;
pub mod scheduler;
pub mod traits;
pub mod types;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
#[cfg(feature = "http")]
pub use api::{ApiConfig, QrLoginClient};
pub use clock::{ClockEvent, SessionClock, format_remaining, is_expiring_soon};
pub use completion::LoginCompletionHandler;
#[cfg(feature = "http")]
pub use config::QrLoginConfig;
pub use error::{Error, GenerateFailure, LoginError};
pub use machine::{LoginEvent, QrSessionMachine, SessionEnd, SessionSnapshot};
pub use poller::{DEFAULT_POLL_INTERVAL, PollEvent, PollSchedule, StatusPoller};
pub use qr_image::{QrImage, QrImageError};
pub use scheduler::{Scheduler, TokioScheduler};
pub use traits::{AuthSessionService, CredentialStore, MemoryCredentialStore, SessionService};
pub use types::{
    AuthenticatedSession, AuthenticatedUser, GeneratedSession, LoginOutcome, QrSession,
    RemoteStatus, SessionId, SessionState, StatusResponse, UserId, UserSummary,
};
