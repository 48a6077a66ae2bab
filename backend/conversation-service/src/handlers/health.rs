use crate::services::ConversationLedger;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Readiness: the store must answer
pub async fn health(ledger: web::Data<ConversationLedger>) -> HttpResponse {
    match ledger.health_check().await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "status": "ok",
            "service": "conversation-service"
        })),
        Err(err) => {
            tracing::warn!(error = %err, "health check failed");
            HttpResponse::ServiceUnavailable().json(json!({
                "status": "unavailable",
                "service": "conversation-service"
            }))
        }
    }
}

/// Liveness: the process is serving requests
pub async fn live() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "alive" }))
}
