//! Live status checkers for streaming platforms.
//!
//! Each supported platform (Twitch, YouTube, Kick) implements [`PlatformChecker`],
//! which turns a [`Channel`] plus its resolved [`CredentialSet`] into a normalized
//! [`StreamStatus`]. Network and API failures never escape a checker: they are
//! reported as [`StreamStatus::Unknown`] so callers can keep their last known state.

pub mod auth;
pub mod backoff;
pub mod channel;
pub mod checker;
pub mod client;
pub mod credentials;
pub mod error;
pub mod factory;
pub mod platforms;
pub mod status;

pub use channel::{Channel, Platform};
pub use checker::PlatformChecker;
pub use credentials::CredentialSet;
pub use error::PlatformError;
pub use factory::{CheckerFactory, Endpoints};
pub use status::{LiveStream, StreamStatus, UnknownReason};
