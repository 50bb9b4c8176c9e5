use thiserror::Error;

use crate::chat::Conversation;
use crate::currency::ExchangeRateTable;
use crate::identity::{ConversationId, MessageId, UserId};
use crate::message::{Message, NewMessage, ReadReceipt};
use crate::pricing::PriceTier;
use crate::product::VariantId;

/// Errors from the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Network or backend failure. Callers may retry; nothing was partially applied.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    /// The store refused the write (constraint other than a duplicate receipt).
    #[error("rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Read-only catalogue data consumed by the pricing and currency helpers.
#[allow(async_fn_in_trait)]
pub trait PricingSource {
    /// Full tier list for one variant, ordered by `min_quantity`.
    async fn price_tiers(&self, variant: &VariantId) -> Result<Vec<PriceTier>, StoreError>;

    /// Current exchange rate snapshot.
    async fn exchange_rates(&self) -> Result<ExchangeRateTable, StoreError>;
}

/// Conversations, messages and read receipts.
///
/// `insert_receipts` is an upsert keyed on (message, user): duplicates are
/// silently skipped so concurrent or repeated marking never creates extra rows.
#[allow(async_fn_in_trait)]
pub trait MessageStore {
    async fn conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError>;

    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Store a message, assign its id and advance the conversation's `last_message_at`.
    async fn append_message(&self, draft: NewMessage) -> Result<Message, StoreError>;

    /// Every message of the conversation, ascending by `created_at`.
    async fn conversation_messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError>;

    async fn message(&self, id: &MessageId) -> Result<Option<Message>, StoreError>;

    /// Receipts held by `viewer` for messages in the conversation.
    async fn viewer_receipts(
        &self,
        conversation: &ConversationId,
        viewer: &UserId,
    ) -> Result<Vec<ReadReceipt>, StoreError>;

    /// Insert the batch in one call. Returns how many rows were actually new.
    async fn insert_receipts(&self, receipts: &[ReadReceipt]) -> Result<usize, StoreError>;

    /// Human-readable backend name (e.g. "memory", "postgres").
    fn backend_name(&self) -> &str;
}
