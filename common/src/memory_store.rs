use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::chat::Conversation;
use crate::currency::ExchangeRateTable;
use crate::identity::{ConversationId, MessageId, UserId};
use crate::message::{Message, NewMessage, ReadReceipt};
use crate::pricing::PriceTier;
use crate::product::VariantId;
use crate::store::{MessageStore, PricingSource, StoreError};

#[derive(Default)]
struct Inner {
    conversations: BTreeMap<ConversationId, Conversation>,
    messages: Vec<Message>,
    receipts: BTreeMap<(MessageId, UserId), ReadReceipt>,
    price_tiers: HashMap<VariantId, Vec<PriceTier>>,
    rates: Option<ExchangeRateTable>,
    next_message: u64,
}

/// In-process store for tests and offline mode.
///
/// Everything lives behind one mutex, so each call is atomic. `set_available(false)`
/// makes every call fail with [`StoreError::Unavailable`] to exercise degraded paths.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    available: AtomicBool,
    receipt_batches: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: AtomicBool::new(true),
            receipt_batches: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Number of `insert_receipts` calls served so far.
    pub fn receipt_batches(&self) -> usize {
        self.receipt_batches.load(Ordering::Relaxed)
    }

    pub fn receipt_count(&self) -> usize {
        self.inner.lock().map(|g| g.receipts.len()).unwrap_or(0)
    }

    pub fn put_price_tiers(&self, variant: VariantId, tiers: Vec<PriceTier>) -> Result<(), StoreError> {
        self.lock()?.price_tiers.insert(variant, tiers);
        Ok(())
    }

    pub fn set_exchange_rates(&self, rates: ExchangeRateTable) -> Result<(), StoreError> {
        self.lock()?.rates = Some(rates);
        Ok(())
    }

    pub fn soft_delete(&self, id: &MessageId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.id == *id)
            .ok_or_else(|| StoreError::not_found("message", id))?;
        message.deleted_at = Some(at);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl PricingSource for MemoryStore {
    async fn price_tiers(&self, variant: &VariantId) -> Result<Vec<PriceTier>, StoreError> {
        let inner = self.lock()?;
        let mut tiers = inner.price_tiers.get(variant).cloned().unwrap_or_default();
        tiers.sort_by_key(|t| t.min_quantity);
        Ok(tiers)
    }

    async fn exchange_rates(&self) -> Result<ExchangeRateTable, StoreError> {
        self.lock()?
            .rates
            .clone()
            .ok_or_else(|| StoreError::not_found("exchange rates", "latest"))
    }
}

impl MessageStore for MemoryStore {
    async fn conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
        Ok(self.lock()?.conversations.get(id).cloned())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.conversations.contains_key(&conversation.id) {
            return Err(StoreError::Rejected(format!(
                "conversation {} already exists",
                conversation.id
            )));
        }
        inner
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn append_message(&self, draft: NewMessage) -> Result<Message, StoreError> {
        let mut inner = self.lock()?;
        let conversation = inner
            .conversations
            .get_mut(&draft.conversation_id)
            .ok_or_else(|| StoreError::not_found("conversation", &draft.conversation_id))?;
        conversation.record_message(draft.created_at);

        inner.next_message += 1;
        let message = Message {
            id: MessageId(format!("m-{}", inner.next_message)),
            conversation_id: draft.conversation_id,
            sender_id: draft.sender_id,
            content: draft.content,
            created_at: draft.created_at,
            deleted_at: None,
        };
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn conversation_messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let inner = self.lock()?;
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == *id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn message(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        Ok(self.lock()?.messages.iter().find(|m| m.id == *id).cloned())
    }

    async fn viewer_receipts(
        &self,
        conversation: &ConversationId,
        viewer: &UserId,
    ) -> Result<Vec<ReadReceipt>, StoreError> {
        let inner = self.lock()?;
        let receipts = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == *conversation)
            .filter_map(|m| inner.receipts.get(&(m.id.clone(), viewer.clone())))
            .cloned()
            .collect();
        Ok(receipts)
    }

    async fn insert_receipts(&self, receipts: &[ReadReceipt]) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        self.receipt_batches.fetch_add(1, Ordering::Relaxed);

        // Receipts for unknown messages or for the sender themselves are dropped.
        let accepted: Vec<&ReadReceipt> = receipts
            .iter()
            .filter(|r| {
                inner
                    .messages
                    .iter()
                    .any(|m| m.id == r.message_id && m.sender_id != r.user_id)
            })
            .collect();

        let mut inserted = 0;
        for receipt in accepted {
            let key = (receipt.message_id.clone(), receipt.user_id.clone());
            if !inner.receipts.contains_key(&key) {
                inner.receipts.insert(key, receipt.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
