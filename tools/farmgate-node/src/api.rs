use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use farmgate_common::chat::{self, Conversation};
use farmgate_common::currency::{try_convert, CurrencyCode};
use farmgate_common::identity::{ConversationId, MessageId, UserId};
use farmgate_common::message::Message;
use farmgate_common::pricing::{resolve_tier, resolve_tier_in, TierQuote};
use farmgate_common::product::VariantId;
use farmgate_common::read_state::{self, AnnotatedMessage, UnreadBadge};
use farmgate_common::store::{MessageStore, PricingSource, StoreError};

use crate::backend::Backend;
use crate::error::ApiError;

pub struct AppState {
    pub backend: Backend,
}

impl AppState {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }
}

type Shared = State<Arc<AppState>>;

// ─── API types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: String,
}

#[derive(Deserialize)]
pub struct QuoteQuery {
    pub quantity: u32,
    pub currency: Option<CurrencyCode>,
}

#[derive(Serialize, Deserialize)]
pub struct QuoteResponse {
    pub variant_id: VariantId,
    pub quantity: u32,
    #[serde(flatten)]
    pub quote: TierQuote,
}

#[derive(Deserialize)]
pub struct ConvertQuery {
    pub amount: Decimal,
    pub from: CurrencyCode,
    pub to: CurrencyCode,
}

#[derive(Serialize, Deserialize)]
pub struct ConvertResponse {
    pub amount: Decimal,
    /// Currency of `amount`: `to` when converted, `from` when no rate was available.
    pub currency: CurrencyCode,
    pub converted: bool,
    pub rates_as_of: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct OpenConversationRequest {
    pub id: Option<ConversationId>,
    pub participant_ids: Vec<UserId>,
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    pub content: String,
}

#[derive(Deserialize)]
pub struct ViewerQuery {
    pub viewer: UserId,
}

#[derive(Deserialize)]
pub struct MarkReadRequest {
    pub viewer_id: UserId,
}

#[derive(Serialize, Deserialize)]
pub struct UnreadResponse {
    pub conversation_id: ConversationId,
    pub badge: UnreadBadge,
    pub shown: usize,
}

#[derive(Serialize, Deserialize)]
pub struct MarkConversationReadResponse {
    pub marked: usize,
}

#[derive(Serialize, Deserialize)]
pub struct MarkMessageReadResponse {
    pub marked: bool,
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn participant_conversation(
    backend: &Backend,
    id: &ConversationId,
    user: &UserId,
) -> Result<Conversation, ApiError> {
    let conversation = backend
        .conversation(id)
        .await?
        .ok_or_else(|| StoreError::not_found("conversation", id))?;
    if !conversation.is_participant(user) {
        return Err(ApiError::Forbidden(format!("{user} is not a participant of {id}")));
    }
    Ok(conversation)
}

// ─── Health ──────────────────────────────────────────────────────────────────

async fn health_handler(State(state): Shared) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: state.backend.backend_name().to_string(),
    })
}

// ─── Pricing ─────────────────────────────────────────────────────────────────

async fn quote_handler(
    State(state): Shared,
    Path(variant): Path<String>,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<QuoteResponse>, ApiError> {
    if query.quantity == 0 {
        return Err(ApiError::BadRequest("quantity must be at least 1".into()));
    }
    let variant_id = VariantId(variant);
    let tiers = state.backend.price_tiers(&variant_id).await?;
    let quote = match &query.currency {
        Some(currency) => resolve_tier_in(query.quantity, &tiers, currency),
        None => resolve_tier(query.quantity, &tiers),
    };
    if !quote.is_available() {
        tracing::debug!(%variant_id, "no price tiers, pricing unavailable");
    }
    Ok(Json(QuoteResponse {
        variant_id,
        quantity: query.quantity,
        quote,
    }))
}

async fn convert_handler(
    State(state): Shared,
    Query(query): Query<ConvertQuery>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let rates = state.backend.exchange_rates().await?;
    let response = match try_convert(query.amount, &query.from, &query.to, &rates) {
        Some(amount) => ConvertResponse {
            amount,
            currency: query.to,
            converted: true,
            rates_as_of: rates.as_of,
        },
        None => ConvertResponse {
            amount: query.amount,
            currency: query.from,
            converted: false,
            rates_as_of: rates.as_of,
        },
    };
    Ok(Json(response))
}

// ─── Conversations ───────────────────────────────────────────────────────────

async fn open_conversation_handler(
    State(state): Shared,
    Json(req): Json<OpenConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let now = Utc::now();
    // Timestamp-based ids when the caller has none.
    let id = req
        .id
        .unwrap_or_else(|| ConversationId(format!("c-{}", now.timestamp_micros())));
    let conversation = chat::open_conversation(&state.backend, id, req.participant_ids, now).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn send_message_handler(
    State(state): Shared,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let id = ConversationId(id);
    participant_conversation(&state.backend, &id, &req.sender_id).await?;
    let message =
        chat::send_message(&state.backend, &id, &req.sender_id, &req.content, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn thread_handler(
    State(state): Shared,
    Path(id): Path<String>,
    Query(query): Query<ViewerQuery>,
) -> Result<Json<Vec<AnnotatedMessage>>, ApiError> {
    let id = ConversationId(id);
    participant_conversation(&state.backend, &id, &query.viewer).await?;
    Ok(Json(read_state::load_thread(&state.backend, &id, &query.viewer).await?))
}

async fn unread_handler(
    State(state): Shared,
    Path(id): Path<String>,
    Query(query): Query<ViewerQuery>,
) -> Result<Json<UnreadResponse>, ApiError> {
    let conversation_id = ConversationId(id);
    let badge = match participant_conversation(&state.backend, &conversation_id, &query.viewer).await {
        Ok(_) => read_state::unread_badge(&state.backend, &conversation_id, &query.viewer).await,
        Err(ApiError::Store(StoreError::Unavailable(reason))) => {
            tracing::warn!(%conversation_id, %reason, "conversation lookup failed, badge unknown");
            UnreadBadge::Unknown
        }
        Err(e) => return Err(e),
    };
    Ok(Json(UnreadResponse {
        conversation_id,
        badge,
        shown: badge.shown(),
    }))
}

async fn mark_conversation_read_handler(
    State(state): Shared,
    Path(id): Path<String>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<MarkConversationReadResponse>, ApiError> {
    let id = ConversationId(id);
    participant_conversation(&state.backend, &id, &req.viewer_id).await?;
    let marked =
        read_state::mark_conversation_read(&state.backend, &id, &req.viewer_id, Utc::now()).await?;
    Ok(Json(MarkConversationReadResponse { marked }))
}

async fn mark_message_read_handler(
    State(state): Shared,
    Path(id): Path<String>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<MarkMessageReadResponse>, ApiError> {
    let id = MessageId(id);
    let message = state
        .backend
        .message(&id)
        .await?
        .ok_or_else(|| StoreError::not_found("message", &id))?;
    participant_conversation(&state.backend, &message.conversation_id, &req.viewer_id).await?;
    let marked = read_state::mark_message_read(&state.backend, &id, &req.viewer_id, Utc::now()).await?;
    Ok(Json(MarkMessageReadResponse { marked }))
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/variants/{id}/quote", get(quote_handler))
        .route("/convert", get(convert_handler))
        .route("/conversations", post(open_conversation_handler))
        .route(
            "/conversations/{id}/messages",
            get(thread_handler).post(send_message_handler),
        )
        .route("/conversations/{id}/unread", get(unread_handler))
        .route("/conversations/{id}/read", post(mark_conversation_read_handler))
        .route("/messages/{id}/read", post(mark_message_read_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
