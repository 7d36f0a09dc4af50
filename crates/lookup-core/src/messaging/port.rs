use async_trait::async_trait;

use crate::{
    domain::PeerId,
    messaging::types::{Message, MessageHandle},
    Result,
};

/// One authenticated upstream session ("identity").
///
/// Implementations report an upstream flood/rate-limit demand as
/// [`Error::RateLimited`](crate::Error::RateLimited) and any other failure as
/// [`Error::Transport`](crate::Error::Transport).
#[async_trait]
pub trait RelaySession: Send + Sync {
    /// Short name used in logs. Must not contain credentials.
    fn label(&self) -> &str;

    async fn send(&self, peer: &PeerId, text: &str) -> Result<MessageHandle>;

    /// The newest `limit` messages of the conversation with `peer`, newest first.
    async fn recent_messages(&self, peer: &PeerId, limit: usize) -> Result<Vec<Message>>;
}
