//! Poll scheduling.

mod poller;

pub use poller::{Poller, PollerConfig};
