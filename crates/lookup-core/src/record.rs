use serde::{Deserialize, Serialize};

/// One entry of the upstream bot's "name change history".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// `DD.MM.YYYY`, verbatim.
    pub date: String,
    pub username: String,
    pub id: Option<String>,
}

/// Structured view of a bot reply. Fields the reply did not contain stay `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub success: bool,
    pub username: Option<String>,
    pub id: Option<String>,
    pub phone: Option<String>,
    pub viewed_by: Option<u64>,
    pub name_history: Vec<HistoryEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The handle normalized to nothing; nothing was sent.
    InvalidHandle,
    /// The identity pool is empty; the relay refuses all work.
    NoIdentities,
    /// Every attempt ran out of time and the last one saw no reply.
    NoReply,
    /// Attempts exhausted for any other reason (rate limits, transport errors).
    RelayFailure,
    /// The caller's overall time limit elapsed first.
    Cancelled,
}

/// Failure reported to the caller. Never a panic, always a kind plus a reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {reason}")]
pub struct ResolveError {
    pub kind: FailureKind,
    pub reason: String,
}

impl ResolveError {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Wire shape handed to front ends: the record itself, or
/// `{"success": false, "kind": ..., "error": ...}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LookupResponse {
    Found(ParsedRecord),
    Failed {
        success: bool,
        kind: FailureKind,
        error: String,
    },
}

impl From<std::result::Result<ParsedRecord, ResolveError>> for LookupResponse {
    fn from(res: std::result::Result<ParsedRecord, ResolveError>) -> Self {
        match res {
            Ok(record) => Self::Found(record),
            Err(e) => e.into(),
        }
    }
}

impl From<ResolveError> for LookupResponse {
    fn from(e: ResolveError) -> Self {
        Self::Failed {
            success: false,
            kind: e.kind,
            error: e.reason,
        }
    }
}
