use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{ConversationId, UserId};
use crate::message::{Message, NewMessage};
use crate::store::{MessageStore, StoreError};

/// Longest message body accepted, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// A buyer/seller (or support) thread between two or more users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participant_ids: BTreeSet<UserId>,
    /// `None` until the first message lands.
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participant_ids.contains(user)
    }

    /// Advance `last_message_at`; never moves backwards.
    pub fn record_message(&mut self, at: DateTime<Utc>) {
        if self.last_message_at.is_none_or(|last| at > last) {
            self.last_message_at = Some(at);
        }
    }
}

/// Create a conversation between at least two distinct users.
pub async fn open_conversation<S: MessageStore>(
    store: &S,
    id: ConversationId,
    participants: impl IntoIterator<Item = UserId>,
    now: DateTime<Utc>,
) -> Result<Conversation, StoreError> {
    let participant_ids: BTreeSet<UserId> = participants.into_iter().collect();
    if participant_ids.len() < 2 {
        return Err(StoreError::Rejected(
            "a conversation needs at least two participants".into(),
        ));
    }
    let conversation = Conversation {
        id,
        participant_ids,
        last_message_at: None,
        created_at: now,
    };
    store.create_conversation(&conversation).await?;
    tracing::debug!(conversation = %conversation.id, "conversation opened");
    Ok(conversation)
}

/// Post a message from a participant.
pub async fn send_message<S: MessageStore>(
    store: &S,
    conversation: &ConversationId,
    sender: &UserId,
    content: &str,
    now: DateTime<Utc>,
) -> Result<Message, StoreError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(StoreError::Rejected("message is empty".into()));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(StoreError::Rejected(format!(
            "message longer than {MAX_MESSAGE_CHARS} characters"
        )));
    }

    let thread = store
        .conversation(conversation)
        .await?
        .ok_or_else(|| StoreError::not_found("conversation", conversation))?;
    if !thread.is_participant(sender) {
        return Err(StoreError::Rejected(format!(
            "{sender} is not a participant of {conversation}"
        )));
    }

    store
        .append_message(NewMessage {
            conversation_id: conversation.clone(),
            sender_id: sender.clone(),
            content: content.to_string(),
            created_at: now,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use chrono::Duration;

    fn users() -> [UserId; 2] {
        [UserId::new("buyer"), UserId::new("seller")]
    }

    #[test]
    fn last_message_at_never_moves_backwards() {
        let now = Utc::now();
        let mut c = Conversation {
            id: ConversationId::new("c"),
            participant_ids: users().into_iter().collect(),
            last_message_at: None,
            created_at: now,
        };
        c.record_message(now);
        c.record_message(now - Duration::minutes(5));
        assert_eq!(c.last_message_at, Some(now));
        c.record_message(now + Duration::minutes(1));
        assert_eq!(c.last_message_at, Some(now + Duration::minutes(1)));
    }

    #[tokio::test]
    async fn needs_two_distinct_participants() {
        let store = MemoryStore::new();
        let solo = [UserId::new("a"), UserId::new("a")];
        let err = open_conversation(&store, ConversationId::new("c"), solo, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
    }

    #[tokio::test]
    async fn sending_bumps_last_message_at() {
        let store = MemoryStore::new();
        let id = ConversationId::new("c");
        let t0 = Utc::now();
        open_conversation(&store, id.clone(), users(), t0).await.unwrap();

        let t1 = t0 + Duration::seconds(30);
        let msg = send_message(&store, &id, &UserId::new("buyer"), "  fresh eggs?  ", t1)
            .await
            .unwrap();
        assert_eq!(msg.content, "fresh eggs?");

        let conversation = store.conversation(&id).await.unwrap().unwrap();
        assert_eq!(conversation.last_message_at, Some(t1));
    }

    #[tokio::test]
    async fn outsiders_and_blank_messages_are_rejected() {
        let store = MemoryStore::new();
        let id = ConversationId::new("c");
        open_conversation(&store, id.clone(), users(), Utc::now()).await.unwrap();

        let outsider = send_message(&store, &id, &UserId::new("lurker"), "hi", Utc::now()).await;
        assert!(matches!(outsider, Err(StoreError::Rejected(_))));

        let blank = send_message(&store, &id, &UserId::new("buyer"), "   ", Utc::now()).await;
        assert!(matches!(blank, Err(StoreError::Rejected(_))));

        let missing = send_message(
            &store,
            &ConversationId::new("nope"),
            &UserId::new("buyer"),
            "hi",
            Utc::now(),
        )
        .await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }
}
