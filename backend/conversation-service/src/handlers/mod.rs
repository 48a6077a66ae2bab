/// HTTP handlers for the conversation share ledger
pub mod conversations;
pub mod health;

use crate::error::LedgerError;
use crate::metrics::serve_metrics;
use actix_web::web;

pub use conversations::{
    count_conversations, create_conversation, delete_conversation, get_conversation,
    get_save_state, homepage, list_conversations, list_my_saved, record_view, share_link,
    toggle_save,
};

/// Extractor failures answer with the same JSON error body as ledger errors
fn extractor_configs(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        LedgerError::InvalidInput(format!("invalid JSON body: {}", err)).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        LedgerError::InvalidInput(format!("invalid query string: {}", err)).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        LedgerError::InvalidInput(format!("invalid path: {}", err)).into()
    }));
}

/// Register every route; shared by the binary and the integration tests
pub fn configure(cfg: &mut web::ServiceConfig) {
    extractor_configs(cfg);
    cfg.route("/metrics", web::get().to(serve_metrics)).service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health))
            .route("/health/live", web::get().to(health::live))
            .route("/home", web::get().to(homepage))
            .route("/me/saved", web::get().to(list_my_saved))
            .service(
                web::scope("/conversations")
                    .route("", web::post().to(create_conversation))
                    .route("", web::get().to(list_conversations))
                    // Literal segment before the {id} matcher.
                    .route("/count", web::get().to(count_conversations))
                    .route("/{id}", web::get().to(get_conversation))
                    .route("/{id}", web::delete().to(delete_conversation))
                    .route("/{id}/views", web::post().to(record_view))
                    .route("/{id}/save", web::post().to(toggle_save))
                    .route("/{id}/save", web::get().to(get_save_state))
                    .route("/{id}/share-link", web::get().to(share_link)),
            ),
    );
}
