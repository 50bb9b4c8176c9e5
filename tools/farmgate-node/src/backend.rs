use farmgate_common::chat::Conversation;
use farmgate_common::currency::ExchangeRateTable;
use farmgate_common::identity::{ConversationId, MessageId, UserId};
use farmgate_common::memory_store::MemoryStore;
use farmgate_common::message::{Message, NewMessage, ReadReceipt};
use farmgate_common::pricing::PriceTier;
use farmgate_common::product::VariantId;
use farmgate_common::store::{MessageStore, PricingSource, StoreError};

use crate::config::Cli;
use crate::postgres::PgStore;

/// The store the node serves from: Postgres when a database URL is configured,
/// otherwise an in-process store (offline/dev mode, lost on restart).
pub enum Backend {
    Postgres(PgStore),
    Memory(MemoryStore),
}

impl Backend {
    pub async fn from_config(cli: &Cli) -> Result<Self, StoreError> {
        match &cli.database_url {
            Some(url) => Ok(Backend::Postgres(PgStore::connect(url, cli.pool_size).await?)),
            None => {
                tracing::warn!("no database url configured, serving from memory");
                Ok(Backend::Memory(MemoryStore::new()))
            }
        }
    }
}

impl PricingSource for Backend {
    async fn price_tiers(&self, variant: &VariantId) -> Result<Vec<PriceTier>, StoreError> {
        match self {
            Backend::Postgres(s) => s.price_tiers(variant).await,
            Backend::Memory(s) => s.price_tiers(variant).await,
        }
    }

    async fn exchange_rates(&self) -> Result<ExchangeRateTable, StoreError> {
        match self {
            Backend::Postgres(s) => s.exchange_rates().await,
            Backend::Memory(s) => s.exchange_rates().await,
        }
    }
}

impl MessageStore for Backend {
    async fn conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
        match self {
            Backend::Postgres(s) => s.conversation(id).await,
            Backend::Memory(s) => s.conversation(id).await,
        }
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        match self {
            Backend::Postgres(s) => s.create_conversation(conversation).await,
            Backend::Memory(s) => s.create_conversation(conversation).await,
        }
    }

    async fn append_message(&self, draft: NewMessage) -> Result<Message, StoreError> {
        match self {
            Backend::Postgres(s) => s.append_message(draft).await,
            Backend::Memory(s) => s.append_message(draft).await,
        }
    }

    async fn conversation_messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        match self {
            Backend::Postgres(s) => s.conversation_messages(id).await,
            Backend::Memory(s) => s.conversation_messages(id).await,
        }
    }

    async fn message(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        match self {
            Backend::Postgres(s) => s.message(id).await,
            Backend::Memory(s) => s.message(id).await,
        }
    }

    async fn viewer_receipts(
        &self,
        conversation: &ConversationId,
        viewer: &UserId,
    ) -> Result<Vec<ReadReceipt>, StoreError> {
        match self {
            Backend::Postgres(s) => s.viewer_receipts(conversation, viewer).await,
            Backend::Memory(s) => s.viewer_receipts(conversation, viewer).await,
        }
    }

    async fn insert_receipts(&self, receipts: &[ReadReceipt]) -> Result<usize, StoreError> {
        match self {
            Backend::Postgres(s) => s.insert_receipts(receipts).await,
            Backend::Memory(s) => s.insert_receipts(receipts).await,
        }
    }

    fn backend_name(&self) -> &str {
        match self {
            Backend::Postgres(s) => s.backend_name(),
            Backend::Memory(s) => s.backend_name(),
        }
    }
}
