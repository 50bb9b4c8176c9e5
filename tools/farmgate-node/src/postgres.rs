//! Postgres-backed store.
//!
//! Receipts rely on the `(message_id, user_id)` primary key: the batch insert
//! uses `ON CONFLICT DO NOTHING`, so concurrent markers never duplicate rows.

use chrono::{DateTime, Utc};
use deadpool_postgres::{Pool, PoolConfig, PoolError, Runtime};
use rust_decimal::Decimal;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

use farmgate_common::chat::Conversation;
use farmgate_common::currency::{CurrencyCode, ExchangeRateTable};
use farmgate_common::identity::{ConversationId, MessageId, UserId};
use farmgate_common::message::{Message, NewMessage, ReadReceipt};
use farmgate_common::pricing::{PriceTier, TierId};
use farmgate_common::product::VariantId;
use farmgate_common::store::{MessageStore, PricingSource, StoreError};

const SCHEMA: &str = include_str!("../schema.sql");

pub struct PgStore {
    pool: Pool,
}

fn db_error(e: tokio_postgres::Error) -> StoreError {
    match e.code() {
        Some(code)
            if *code == SqlState::FOREIGN_KEY_VIOLATION
                || *code == SqlState::CHECK_VIOLATION
                || *code == SqlState::UNIQUE_VIOLATION
                || *code == SqlState::NOT_NULL_VIOLATION =>
        {
            StoreError::Rejected(e.to_string())
        }
        _ => StoreError::Unavailable(e.to_string()),
    }
}

fn pool_error(e: PoolError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn quantity(value: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Unavailable(format!("{column} out of range: {value}")))
}

fn message_from_row(row: &Row) -> Result<Message, StoreError> {
    Ok(Message {
        id: MessageId(row.try_get("id").map_err(db_error)?),
        conversation_id: ConversationId(row.try_get("conversation_id").map_err(db_error)?),
        sender_id: UserId(row.try_get("sender_id").map_err(db_error)?),
        content: row.try_get("content").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        deleted_at: row.try_get("deleted_at").map_err(db_error)?,
    })
}

fn tier_from_row(row: &Row) -> Result<PriceTier, StoreError> {
    let min: i64 = row.try_get("min_quantity").map_err(db_error)?;
    let max: Option<i64> = row.try_get("max_quantity").map_err(db_error)?;
    Ok(PriceTier {
        id: TierId(row.try_get("id").map_err(db_error)?),
        min_quantity: quantity(min, "min_quantity")?,
        max_quantity: max.map(|m| quantity(m, "max_quantity")).transpose()?,
        price_per_unit: row.try_get("price_per_unit").map_err(db_error)?,
        discount_percentage: row.try_get("discount_percentage").map_err(db_error)?,
    })
}

/// One `exchange_rates` row.
struct RateRow {
    base_currency: String,
    currency: String,
    rate: Decimal,
    as_of: DateTime<Utc>,
}

/// Build a table from one snapshot. The first row fixes base and `as_of`;
/// rows from any other snapshot are skipped.
fn rate_table_from_rows(rows: Vec<RateRow>) -> Option<ExchangeRateTable> {
    let first = rows.first()?;
    let base = CurrencyCode::new(&first.base_currency);
    let as_of = first.as_of;
    let rates: Vec<(CurrencyCode, Decimal)> = rows
        .into_iter()
        .filter(|r| {
            let same = CurrencyCode::new(&r.base_currency) == base && r.as_of == as_of;
            if !same {
                tracing::warn!(base = %r.base_currency, currency = %r.currency, "skipping rate from another snapshot");
            }
            same
        })
        .map(|r| (CurrencyCode::new(r.currency), r.rate))
        .collect();
    Some(ExchangeRateTable::new(base, rates, as_of))
}

impl PgStore {
    /// Build a connection pool and make sure the schema exists.
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self, StoreError> {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(url.to_string());
        cfg.pool = Some(PoolConfig::new(pool_size));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client.batch_execute(SCHEMA).await.map_err(db_error)?;
        info!("postgres schema ready");
        Ok(())
    }
}

impl PricingSource for PgStore {
    async fn price_tiers(&self, variant: &VariantId) -> Result<Vec<PriceTier>, StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = client
            .query(
                "SELECT id, min_quantity, max_quantity, price_per_unit, discount_percentage
                 FROM price_tiers WHERE variant_id = $1
                 ORDER BY min_quantity",
                &[&variant.0],
            )
            .await
            .map_err(db_error)?;
        rows.iter().map(tier_from_row).collect()
    }

    async fn exchange_rates(&self) -> Result<ExchangeRateTable, StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = client
            .query(
                "SELECT base_currency, currency, rate, as_of FROM exchange_rates
                 WHERE (base_currency, as_of) = (
                     SELECT base_currency, as_of FROM exchange_rates
                     ORDER BY as_of DESC, base_currency
                     LIMIT 1)
                 ORDER BY currency",
                &[],
            )
            .await
            .map_err(db_error)?;

        let mut snapshot = Vec::with_capacity(rows.len());
        for row in &rows {
            snapshot.push(RateRow {
                base_currency: row.try_get("base_currency").map_err(db_error)?,
                currency: row.try_get("currency").map_err(db_error)?,
                rate: row.try_get("rate").map_err(db_error)?,
                as_of: row.try_get("as_of").map_err(db_error)?,
            });
        }
        rate_table_from_rows(snapshot)
            .ok_or_else(|| StoreError::not_found("exchange rates", "latest"))
    }
}

impl MessageStore for PgStore {
    async fn conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(
                "SELECT c.created_at, c.last_message_at, array_agg(p.user_id) AS participants
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE c.id = $1
                 GROUP BY c.id",
                &[&id.0],
            )
            .await
            .map_err(db_error)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let participants: Vec<String> = row.try_get("participants").map_err(db_error)?;
        Ok(Some(Conversation {
            id: id.clone(),
            participant_ids: participants.into_iter().map(UserId).collect(),
            last_message_at: row.try_get("last_message_at").map_err(db_error)?,
            created_at: row.try_get("created_at").map_err(db_error)?,
        }))
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut client = self.pool.get().await.map_err(pool_error)?;
        let tx = client.transaction().await.map_err(db_error)?;

        let created = tx
            .execute(
                "INSERT INTO conversations (id, created_at, last_message_at)
                 VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING",
                &[
                    &conversation.id.0,
                    &conversation.created_at,
                    &conversation.last_message_at,
                ],
            )
            .await
            .map_err(db_error)?;
        if created == 0 {
            return Err(StoreError::Rejected(format!(
                "conversation {} already exists",
                conversation.id
            )));
        }

        let participants: Vec<String> = conversation
            .participant_ids
            .iter()
            .map(|u| u.0.clone())
            .collect();
        tx.execute(
            "INSERT INTO conversation_participants (conversation_id, user_id)
             SELECT $1, unnest($2::text[])",
            &[&conversation.id.0, &participants],
        )
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)
    }

    async fn append_message(&self, draft: NewMessage) -> Result<Message, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_error)?;
        let tx = client.transaction().await.map_err(db_error)?;

        let bumped = tx
            .execute(
                "UPDATE conversations
                 SET last_message_at = GREATEST(COALESCE(last_message_at, $2), $2)
                 WHERE id = $1",
                &[&draft.conversation_id.0, &draft.created_at],
            )
            .await
            .map_err(db_error)?;
        if bumped == 0 {
            return Err(StoreError::not_found("conversation", &draft.conversation_id));
        }

        let row = tx
            .query_one(
                "INSERT INTO messages (conversation_id, sender_id, content, created_at)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id, conversation_id, sender_id, content, created_at, deleted_at",
                &[
                    &draft.conversation_id.0,
                    &draft.sender_id.0,
                    &draft.content,
                    &draft.created_at,
                ],
            )
            .await
            .map_err(db_error)?;
        let message = message_from_row(&row)?;

        tx.commit().await.map_err(db_error)?;
        Ok(message)
    }

    async fn conversation_messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = client
            .query(
                "SELECT id, conversation_id, sender_id, content, created_at, deleted_at
                 FROM messages WHERE conversation_id = $1
                 ORDER BY created_at, id",
                &[&id.0],
            )
            .await
            .map_err(db_error)?;
        rows.iter().map(message_from_row).collect()
    }

    async fn message(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(
                "SELECT id, conversation_id, sender_id, content, created_at, deleted_at
                 FROM messages WHERE id = $1",
                &[&id.0],
            )
            .await
            .map_err(db_error)?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn viewer_receipts(
        &self,
        conversation: &ConversationId,
        viewer: &UserId,
    ) -> Result<Vec<ReadReceipt>, StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let rows = client
            .query(
                "SELECT r.message_id, r.read_at
                 FROM read_receipts r
                 JOIN messages m ON m.id = r.message_id
                 WHERE m.conversation_id = $1 AND r.user_id = $2",
                &[&conversation.0, &viewer.0],
            )
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|row| -> Result<ReadReceipt, StoreError> {
                Ok(ReadReceipt {
                    message_id: MessageId(row.try_get("message_id").map_err(db_error)?),
                    user_id: viewer.clone(),
                    read_at: row.try_get("read_at").map_err(db_error)?,
                })
            })
            .collect()
    }

    async fn insert_receipts(&self, receipts: &[ReadReceipt]) -> Result<usize, StoreError> {
        if receipts.is_empty() {
            return Ok(0);
        }
        let message_ids: Vec<String> = receipts.iter().map(|r| r.message_id.0.clone()).collect();
        let user_ids: Vec<String> = receipts.iter().map(|r| r.user_id.0.clone()).collect();
        let read_at: Vec<DateTime<Utc>> = receipts.iter().map(|r| r.read_at).collect();

        let client = self.pool.get().await.map_err(pool_error)?;
        let inserted = client
            .execute(
                "INSERT INTO read_receipts (message_id, user_id, read_at)
                 SELECT r.message_id, r.user_id, r.read_at
                 FROM unnest($1::text[], $2::text[], $3::timestamptz[])
                      AS r (message_id, user_id, read_at)
                 JOIN messages m ON m.id = r.message_id
                 WHERE m.sender_id <> r.user_id
                 ON CONFLICT (message_id, user_id) DO NOTHING",
                &[&message_ids, &user_ids, &read_at],
            )
            .await
            .map_err(db_error)?;
        debug!(submitted = receipts.len(), inserted, "receipt batch");
        Ok(inserted as usize)
    }

    fn backend_name(&self) -> &str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(base: &str, currency: &str, rate: &str, as_of: DateTime<Utc>) -> RateRow {
        RateRow {
            base_currency: base.into(),
            currency: currency.into(),
            rate: rate.parse().unwrap(),
            as_of,
        }
    }

    #[test]
    fn rate_table_keeps_one_base() {
        let now = Utc::now();
        let table = rate_table_from_rows(vec![
            row("XAF", "USD", "0.0016", now),
            row("EUR", "USD", "1.08", now),
            row("XAF", "EUR", "0.001524", now),
        ])
        .unwrap();

        assert_eq!(table.base_currency, CurrencyCode::new("XAF"));
        assert_eq!(table.rate(&CurrencyCode::new("USD")), Some("0.0016".parse().unwrap()));
        assert_eq!(table.rate(&CurrencyCode::new("EUR")), Some("0.001524".parse().unwrap()));
    }

    #[test]
    fn rate_table_skips_other_snapshots() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::hours(1);
        let table = rate_table_from_rows(vec![
            row("XAF", "USD", "0.0016", now),
            row("XAF", "GHS", "0.019", earlier),
        ])
        .unwrap();
        assert_eq!(table.as_of, now);
        assert_eq!(table.rate(&CurrencyCode::new("GHS")), None);
    }

    #[test]
    fn no_rows_no_table() {
        assert!(rate_table_from_rows(Vec::new()).is_none());
    }
}
