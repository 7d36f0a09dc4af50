//! Upstream messaging abstractions: the session port the relay drives.

pub mod port;
pub mod throttled;
pub mod types;
