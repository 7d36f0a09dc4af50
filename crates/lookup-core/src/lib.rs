//! Core of the handle lookup relay.
//!
//! A lookup is a conversation with a third-party bot: send `t.me/<handle>`,
//! wait for the bot to answer in the same chat, parse the answer. This crate
//! holds the identity pool, the send/poll/correlate loop, rate-limit backoff
//! and the reply parser. Upstream sessions and front ends live behind ports
//! implemented in adapter crates.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod parser;
pub mod pool;
pub mod record;
pub mod relay;
pub mod security;

pub use errors::{Error, Result};
pub use record::{FailureKind, LookupResponse, ParsedRecord, ResolveError};
pub use relay::{Relay, RelayConfig};
