use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{ConversationId, MessageId, UserId};

/// A message inside a conversation.
///
/// Messages are append-only; the only later mutation is a soft delete stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A message before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Marks that `user_id` has seen `message_id`. At most one per (message, user),
/// and never for the message's own sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

impl ReadReceipt {
    pub fn new(message_id: MessageId, user_id: UserId, read_at: DateTime<Utc>) -> Self {
        Self {
            message_id,
            user_id,
            read_at,
        }
    }
}
