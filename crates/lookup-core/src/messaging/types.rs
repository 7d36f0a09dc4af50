use crate::domain::SequenceId;

/// Handle returned for a message we just sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHandle {
    pub sequence_id: SequenceId,
    pub is_self_originated: bool,
}

/// One entry of a conversation's history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub sequence_id: SequenceId,
    pub is_self_originated: bool,
    pub text: String,
}

impl Message {
    pub fn handle(&self) -> MessageHandle {
        MessageHandle {
            sequence_id: self.sequence_id,
            is_self_originated: self.is_self_originated,
        }
    }

    /// Whether this message can be the reply to a query sent at `baseline`.
    pub fn replies_to(&self, baseline: &MessageHandle) -> bool {
        self.sequence_id > baseline.sequence_id
            && !self.is_self_originated
            && !self.text.trim().is_empty()
    }
}
