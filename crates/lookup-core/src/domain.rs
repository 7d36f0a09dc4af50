use std::fmt;

use crate::{errors::Error, Result};

/// Upstream conversation peer (bot username or numeric id, as the session understands it).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(peer: impl Into<String>) -> Self {
        Self(peer.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a message within one conversation. Strictly increasing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceId(pub i64);

/// Trim surrounding whitespace, then strip exactly one leading `@`.
pub fn normalize_handle(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_prefix('@').unwrap_or(trimmed).to_string()
}

/// A validated lookup request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub handle: String,
    pub normalized_handle: String,
}

impl Query {
    /// Rejects handles that normalize to nothing (`""`, `"  "`, `"@"`).
    pub fn new(handle: &str) -> Result<Self> {
        let normalized_handle = normalize_handle(handle);
        if normalized_handle.is_empty() {
            return Err(Error::InvalidHandle(handle.to_string()));
        }
        Ok(Self {
            handle: handle.to_string(),
            normalized_handle,
        })
    }

    /// Text sent to the target peer, e.g. `t.me/alice`.
    ///
    /// The prefix is whatever reference form the upstream bot recognizes.
    pub fn payload(&self, link_prefix: &str) -> String {
        format!("{link_prefix}{}", self.normalized_handle)
    }
}
