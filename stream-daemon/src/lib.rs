//! stream-daemon library crate.
//!
//! Polls streaming platforms for live status and announces new streams to
//! Discord, Mastodon and Bluesky. Exposed as a library for integration testing.

pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod scheduler;
pub mod secrets;
pub mod services;

pub use error::{Error, Result};
