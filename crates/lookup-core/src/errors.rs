use std::time::Duration;

/// Core error type for the lookup relay.
///
/// Adapter crates map their transport errors into this type so the relay can
/// tell a rate-limit signal (retry after a wait) from any other failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid handle: {0:?}")]
    InvalidHandle(String),

    #[error("identity pool is empty")]
    NoIdentities,

    #[error("rate limited: retry after {}s", .0.as_secs())]
    RateLimited(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
