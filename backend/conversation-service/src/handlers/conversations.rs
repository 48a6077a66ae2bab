/// Conversation handlers - HTTP endpoints for the share ledger
use crate::domain::OrderBy;
use crate::error::{LedgerError, LedgerResult};
use crate::middleware::MaybeActor;
use crate::services::ConversationLedger;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

const DEFAULT_LIST_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub content: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListQuery {
    pub order_by: Option<String>,
    #[validate(range(min = 0, max = 1000))]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LimitQuery {
    #[validate(range(min = 0, max = 1000))]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ViewCountResponse {
    pub view_count: i64,
}

#[derive(Debug, Serialize)]
pub struct SavedResponse {
    pub saved: bool,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct ShareLinkResponse {
    pub url: String,
}

fn validate_query<T: Validate>(query: &T) -> LedgerResult<()> {
    query
        .validate()
        .map_err(|e| LedgerError::InvalidInput(e.to_string()))
}

fn idempotency_key(req: &HttpRequest) -> LedgerResult<Option<&str>> {
    req.headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| {
            value.to_str().map_err(|_| {
                LedgerError::InvalidInput("malformed Idempotency-Key header".to_string())
            })
        })
        .transpose()
}

/// Submit a new conversation
pub async fn create_conversation(
    ledger: web::Data<ConversationLedger>,
    actor: MaybeActor,
    body: web::Json<CreateConversationRequest>,
) -> LedgerResult<HttpResponse> {
    let conversation = ledger
        .create(body.into_inner().content, actor.actor())
        .await?;
    Ok(HttpResponse::Created().json(conversation))
}

/// Get an Active conversation by ID
pub async fn get_conversation(
    ledger: web::Data<ConversationLedger>,
    id: web::Path<Uuid>,
) -> LedgerResult<HttpResponse> {
    let conversation = ledger.lookup(*id).await?;
    Ok(HttpResponse::Ok().json(conversation))
}

pub async fn record_view(
    ledger: web::Data<ConversationLedger>,
    id: web::Path<Uuid>,
) -> LedgerResult<HttpResponse> {
    let view_count = ledger.record_view(*id).await?;
    Ok(HttpResponse::Ok().json(ViewCountResponse { view_count }))
}

/// Toggle the caller's save.
///
/// Only requests carrying an `Idempotency-Key` are replay-safe: a retried
/// keyless request flips the save again. With
/// `LEDGER_REQUIRE_IDEMPOTENCY_KEY=true` keyless requests are rejected with 400.
pub async fn toggle_save(
    ledger: web::Data<ConversationLedger>,
    actor: MaybeActor,
    id: web::Path<Uuid>,
    req: HttpRequest,
) -> LedgerResult<HttpResponse> {
    let key = idempotency_key(&req)?;
    let outcome = ledger.toggle_save(*id, actor.actor(), key).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

pub async fn get_save_state(
    ledger: web::Data<ConversationLedger>,
    actor: MaybeActor,
    id: web::Path<Uuid>,
) -> LedgerResult<HttpResponse> {
    let saved = ledger.is_saved(*id, actor.actor()).await?;
    Ok(HttpResponse::Ok().json(SavedResponse { saved }))
}

pub async fn delete_conversation(
    ledger: web::Data<ConversationLedger>,
    actor: MaybeActor,
    id: web::Path<Uuid>,
) -> LedgerResult<HttpResponse> {
    ledger.soft_delete(*id, actor.actor()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn list_conversations(
    ledger: web::Data<ConversationLedger>,
    query: web::Query<ListQuery>,
) -> LedgerResult<HttpResponse> {
    validate_query(&*query)?;
    let order = match query.order_by.as_deref() {
        Some(raw) => raw.parse::<OrderBy>()?,
        None => OrderBy::default(),
    };
    let rows = ledger
        .list_top(query.limit.unwrap_or(DEFAULT_LIST_LIMIT), order)
        .await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn count_conversations(
    ledger: web::Data<ConversationLedger>,
) -> LedgerResult<HttpResponse> {
    let total = ledger.count_active().await?;
    Ok(HttpResponse::Ok().json(CountResponse { total }))
}

pub async fn share_link(
    ledger: web::Data<ConversationLedger>,
    id: web::Path<Uuid>,
) -> LedgerResult<HttpResponse> {
    let url = ledger.share_link(*id).await?;
    Ok(HttpResponse::Ok().json(ShareLinkResponse { url }))
}

/// Landing page: active total and most viewed conversations
pub async fn homepage(ledger: web::Data<ConversationLedger>) -> LedgerResult<HttpResponse> {
    let data = ledger.homepage().await?;
    Ok(HttpResponse::Ok().json(data))
}

pub async fn list_my_saved(
    ledger: web::Data<ConversationLedger>,
    actor: MaybeActor,
    query: web::Query<LimitQuery>,
) -> LedgerResult<HttpResponse> {
    validate_query(&*query)?;
    let rows = ledger
        .list_saved(actor.actor(), query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(HttpResponse::Ok().json(rows))
}
