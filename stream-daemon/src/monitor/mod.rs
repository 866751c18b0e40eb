//! Channel state tracking.

pub mod state;

pub use state::{LiveState, LiveStateStore, NotificationEvent, StateTracker};
