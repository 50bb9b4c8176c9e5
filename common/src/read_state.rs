//! Per-viewer read/unread bookkeeping for conversations.
//!
//! A message is unread for a viewer when it was sent by someone else, is not
//! deleted, and the viewer holds no receipt for it. The viewer's own messages
//! are always read. Marking is idempotent: receipts are inserted as one batch
//! upsert, so repeating the call (or racing another tab) never duplicates rows.
//!
//! Read paths degrade instead of failing: when receipts cannot be loaded the
//! status becomes [`ReadStatus::Unknown`], which renders as read.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{ConversationId, MessageId, UserId};
use crate::message::{Message, ReadReceipt};
use crate::store::{MessageStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStatus {
    Read,
    Unread,
    /// Receipts could not be loaded. Treated as read.
    Unknown,
}

impl ReadStatus {
    pub fn is_unread(self) -> bool {
        self == ReadStatus::Unread
    }
}

/// A message with its status for one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub status: ReadStatus,
}

/// Unread count for a badge. `Unknown` is displayed as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "count", rename_all = "snake_case")]
pub enum UnreadBadge {
    Known(usize),
    Unknown,
}

impl UnreadBadge {
    pub fn shown(self) -> usize {
        match self {
            UnreadBadge::Known(n) => n,
            UnreadBadge::Unknown => 0,
        }
    }
}

fn read_by<'a>(receipts: &'a [ReadReceipt], viewer: &UserId) -> HashSet<&'a MessageId> {
    receipts
        .iter()
        .filter(|r| r.user_id == *viewer)
        .map(|r| &r.message_id)
        .collect()
}

fn counts_as_unread(message: &Message, viewer: &UserId, read: &HashSet<&MessageId>) -> bool {
    message.sender_id != *viewer && !message.is_deleted() && !read.contains(&message.id)
}

/// Messages from others, not deleted, with no receipt for `viewer`.
pub fn compute_unread_count(messages: &[Message], viewer: &UserId, receipts: &[ReadReceipt]) -> usize {
    let read = read_by(receipts, viewer);
    messages
        .iter()
        .filter(|m| counts_as_unread(m, viewer, &read))
        .count()
}

/// Annotate `messages` in the order given. `receipts = None` means they could
/// not be loaded; every message then gets [`ReadStatus::Unknown`] except the
/// viewer's own, which are always read.
pub fn annotate(
    messages: Vec<Message>,
    viewer: &UserId,
    receipts: Option<&[ReadReceipt]>,
) -> Vec<AnnotatedMessage> {
    let read = receipts.map(|r| read_by(r, viewer));
    messages
        .into_iter()
        .map(|message| {
            let status = match &read {
                _ if message.sender_id == *viewer => ReadStatus::Read,
                None => ReadStatus::Unknown,
                Some(read) if counts_as_unread(&message, viewer, read) => ReadStatus::Unread,
                Some(_) => ReadStatus::Read,
            };
            AnnotatedMessage { message, status }
        })
        .collect()
}

/// Receipts `viewer` still lacks for messages authored by others.
pub fn missing_receipts(
    messages: &[Message],
    viewer: &UserId,
    existing: &[ReadReceipt],
    now: DateTime<Utc>,
) -> Vec<ReadReceipt> {
    let read = read_by(existing, viewer);
    let mut seen = HashSet::new();
    messages
        .iter()
        .filter(|m| m.sender_id != *viewer && !read.contains(&m.id))
        .filter(|m| seen.insert(m.id.clone()))
        .map(|m| ReadReceipt::new(m.id.clone(), viewer.clone(), now))
        .collect()
}

/// Mark every message from others in the conversation as read by `viewer`.
///
/// Submits the missing receipts as a single batch and returns how many the
/// store actually inserted. A message posted between the read and the write
/// stays unread until the next call.
pub async fn mark_conversation_read<S: MessageStore>(
    store: &S,
    conversation: &ConversationId,
    viewer: &UserId,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let messages = store.conversation_messages(conversation).await?;
    let existing = store.viewer_receipts(conversation, viewer).await?;
    let batch = missing_receipts(&messages, viewer, &existing, now);
    if batch.is_empty() {
        return Ok(0);
    }

    let inserted = store.insert_receipts(&batch).await?;
    tracing::debug!(
        %conversation,
        %viewer,
        submitted = batch.len(),
        inserted,
        "marked conversation read"
    );
    Ok(inserted)
}

/// Mark a single message read, e.g. from a notification preview.
///
/// Returns `true` when a new receipt was written. The sender reading their own
/// message is a no-op.
pub async fn mark_message_read<S: MessageStore>(
    store: &S,
    message: &MessageId,
    viewer: &UserId,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let message = store
        .message(message)
        .await?
        .ok_or_else(|| StoreError::not_found("message", message))?;
    if message.sender_id == *viewer {
        return Ok(false);
    }
    let receipt = ReadReceipt::new(message.id, viewer.clone(), now);
    Ok(store.insert_receipts(std::slice::from_ref(&receipt)).await? > 0)
}

/// Load a conversation annotated for `viewer`, ascending by `created_at`.
///
/// Failing to load messages is an error; failing to load receipts only
/// downgrades statuses to [`ReadStatus::Unknown`].
pub async fn load_thread<S: MessageStore>(
    store: &S,
    conversation: &ConversationId,
    viewer: &UserId,
) -> Result<Vec<AnnotatedMessage>, StoreError> {
    let messages = store.conversation_messages(conversation).await?;
    match store.viewer_receipts(conversation, viewer).await {
        Ok(receipts) => Ok(annotate(messages, viewer, Some(&receipts))),
        Err(e) => {
            tracing::warn!(%conversation, %viewer, "receipts unavailable, read state unknown: {e}");
            Ok(annotate(messages, viewer, None))
        }
    }
}

/// Unread badge for a conversation. Never fails.
pub async fn unread_badge<S: MessageStore>(
    store: &S,
    conversation: &ConversationId,
    viewer: &UserId,
) -> UnreadBadge {
    let counted = async {
        let messages = store.conversation_messages(conversation).await?;
        let receipts = store.viewer_receipts(conversation, viewer).await?;
        Ok::<_, StoreError>(compute_unread_count(&messages, viewer, &receipts))
    };
    match counted.await {
        Ok(n) => UnreadBadge::Known(n),
        Err(e) => {
            tracing::warn!(%conversation, %viewer, "unread count unknown: {e}");
            UnreadBadge::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{open_conversation, send_message};
    use crate::memory_store::MemoryStore;
    use chrono::Duration;

    fn alice() -> UserId {
        UserId::new("alice")
    }

    fn bob() -> UserId {
        UserId::new("bob")
    }

    fn msg(id: &str, sender: &UserId, minute: i64) -> Message {
        Message {
            id: MessageId::new(id),
            conversation_id: ConversationId::new("c"),
            sender_id: sender.clone(),
            content: format!("message {id}"),
            created_at: DateTime::from_timestamp(1_700_000_000 + minute * 60, 0).unwrap(),
            deleted_at: None,
        }
    }

    /// Conversation with three messages from bob, none read by alice.
    async fn three_from_bob() -> (MemoryStore, ConversationId) {
        let store = MemoryStore::new();
        let id = ConversationId::new("c");
        let t0 = Utc::now();
        open_conversation(&store, id.clone(), [alice(), bob()], t0).await.unwrap();
        for (i, text) in ["maize in stock?", "50 bags left", "price drops at 10"].iter().enumerate() {
            send_message(&store, &id, &bob(), text, t0 + Duration::seconds(i as i64)).await.unwrap();
        }
        (store, id)
    }

    #[test]
    fn own_messages_are_never_unread() {
        let messages = vec![msg("1", &alice(), 0), msg("2", &alice(), 1)];
        assert_eq!(compute_unread_count(&messages, &alice(), &[]), 0);
        assert_eq!(compute_unread_count(&messages, &bob(), &[]), 2);
    }

    #[test]
    fn receipts_and_deletes_reduce_the_count() {
        let mut deleted = msg("3", &bob(), 2);
        deleted.deleted_at = Some(Utc::now());
        let messages = vec![msg("1", &bob(), 0), msg("2", &bob(), 1), deleted];
        let receipts = vec![
            ReadReceipt::new(MessageId::new("1"), alice(), Utc::now()),
            // someone else's receipt must not count for alice
            ReadReceipt::new(MessageId::new("2"), UserId::new("carol"), Utc::now()),
        ];
        assert_eq!(compute_unread_count(&messages, &alice(), &receipts), 1);
    }

    #[test]
    fn annotate_keeps_order_and_marks_statuses() {
        let messages = vec![msg("1", &bob(), 0), msg("2", &alice(), 1), msg("3", &bob(), 2)];
        let receipts = vec![ReadReceipt::new(MessageId::new("1"), alice(), Utc::now())];
        let annotated = annotate(messages, &alice(), Some(&receipts));
        let got: Vec<(&str, ReadStatus)> = annotated
            .iter()
            .map(|a| (a.message.id.as_str(), a.status))
            .collect();
        assert_eq!(
            got,
            vec![
                ("1", ReadStatus::Read),
                ("2", ReadStatus::Read),
                ("3", ReadStatus::Unread),
            ]
        );
    }

    #[test]
    fn annotate_without_receipts_is_unknown_not_unread() {
        let messages = vec![msg("1", &bob(), 0), msg("2", &alice(), 1)];
        let annotated = annotate(messages, &alice(), None);
        assert_eq!(annotated[0].status, ReadStatus::Unknown);
        assert_eq!(annotated[1].status, ReadStatus::Read);
        assert!(annotated.iter().all(|a| !a.status.is_unread()));
    }

    #[test]
    fn missing_receipts_skip_own_and_already_read() {
        let messages = vec![msg("1", &bob(), 0), msg("2", &alice(), 1), msg("3", &bob(), 2)];
        let existing = vec![ReadReceipt::new(MessageId::new("1"), alice(), Utc::now())];
        let batch = missing_receipts(&messages, &alice(), &existing, Utc::now());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message_id, MessageId::new("3"));
        assert_eq!(batch[0].user_id, alice());
    }

    #[tokio::test]
    async fn marking_a_conversation_read_is_idempotent() {
        let (store, id) = three_from_bob().await;
        assert_eq!(unread_badge(&store, &id, &alice()).await, UnreadBadge::Known(3));

        let inserted = mark_conversation_read(&store, &id, &alice(), Utc::now()).await.unwrap();
        assert_eq!(inserted, 3);
        assert_eq!(unread_badge(&store, &id, &alice()).await, UnreadBadge::Known(0));
        assert_eq!(store.receipt_batches(), 1);

        let again = mark_conversation_read(&store, &id, &alice(), Utc::now()).await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(store.receipt_count(), 3);
        assert_eq!(unread_badge(&store, &id, &alice()).await, UnreadBadge::Known(0));
        // nothing missing, so no second batch was submitted
        assert_eq!(store.receipt_batches(), 1);
    }

    #[tokio::test]
    async fn sender_marking_own_thread_writes_nothing() {
        let (store, id) = three_from_bob().await;
        assert_eq!(mark_conversation_read(&store, &id, &bob(), Utc::now()).await.unwrap(), 0);
        assert_eq!(store.receipt_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_batches_are_absorbed() {
        let (store, id) = three_from_bob().await;
        let messages = store.conversation_messages(&id).await.unwrap();
        let batch = missing_receipts(&messages, &alice(), &[], Utc::now());

        assert_eq!(store.insert_receipts(&batch).await.unwrap(), 3);
        assert_eq!(store.insert_receipts(&batch).await.unwrap(), 0);
        assert_eq!(store.receipt_count(), 3);
    }

    #[tokio::test]
    async fn single_message_read() {
        let (store, id) = three_from_bob().await;
        let first = store.conversation_messages(&id).await.unwrap().remove(0);

        assert!(mark_message_read(&store, &first.id, &alice(), Utc::now()).await.unwrap());
        assert!(!mark_message_read(&store, &first.id, &alice(), Utc::now()).await.unwrap());
        assert!(!mark_message_read(&store, &first.id, &bob(), Utc::now()).await.unwrap());
        assert_eq!(unread_badge(&store, &id, &alice()).await, UnreadBadge::Known(2));

        let missing = mark_message_read(&store, &MessageId::new("nope"), &alice(), Utc::now()).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn new_message_after_marking_is_unread_until_next_pass() {
        let (store, id) = three_from_bob().await;
        mark_conversation_read(&store, &id, &alice(), Utc::now()).await.unwrap();
        send_message(&store, &id, &bob(), "one more thing", Utc::now() + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(unread_badge(&store, &id, &alice()).await, UnreadBadge::Known(1));

        assert_eq!(mark_conversation_read(&store, &id, &alice(), Utc::now()).await.unwrap(), 1);
        assert_eq!(unread_badge(&store, &id, &alice()).await, UnreadBadge::Known(0));
    }

    #[tokio::test]
    async fn store_outage_propagates_from_marking_but_degrades_badges() {
        let (store, id) = three_from_bob().await;
        store.set_available(false);

        let err = mark_conversation_read(&store, &id, &alice(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        let badge = unread_badge(&store, &id, &alice()).await;
        assert_eq!(badge, UnreadBadge::Unknown);
        assert_eq!(badge.shown(), 0);

        store.set_available(true);
        assert_eq!(store.receipt_count(), 0);
        assert_eq!(unread_badge(&store, &id, &alice()).await, UnreadBadge::Known(3));
    }

    #[tokio::test]
    async fn thread_is_ascending_and_annotated() {
        let (store, id) = three_from_bob().await;
        send_message(&store, &id, &alice(), "I'll take 12", Utc::now() + Duration::minutes(1))
            .await
            .unwrap();
        let thread = load_thread(&store, &id, &alice()).await.unwrap();
        assert_eq!(thread.len(), 4);
        assert!(thread
            .windows(2)
            .all(|w| w[0].message.created_at <= w[1].message.created_at));
        assert_eq!(thread.iter().filter(|a| a.status.is_unread()).count(), 3);
        assert_eq!(thread[3].status, ReadStatus::Read);
    }

    #[test]
    fn badge_json_shape() {
        assert_eq!(
            serde_json::to_value(UnreadBadge::Known(2)).unwrap(),
            serde_json::json!({ "state": "known", "count": 2 })
        );
        assert_eq!(
            serde_json::to_value(UnreadBadge::Unknown).unwrap(),
            serde_json::json!({ "state": "unknown" })
        );
    }
}
