/// Prometheus metrics for the conversation ledger
use actix_web::{HttpResponse, Responder};
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Views applied to Active conversations
    pub static ref VIEWS_TOTAL: IntCounter = register_int_counter!(
        "ledger_views_total",
        "Total number of recorded conversation views"
    )
    .expect("Prometheus metrics registration should succeed at startup");

    /// Save toggles (labels: result=saved|unsaved|replayed)
    pub static ref SAVE_TOGGLES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ledger_save_toggles_total",
        "Total number of save toggles by result",
        &["result"]
    )
    .expect("Prometheus metrics registration should succeed at startup");

    /// Soft deletes (labels: result=deleted|already_deleted)
    pub static ref DELETES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ledger_deletes_total",
        "Total number of soft delete requests by result",
        &["result"]
    )
    .expect("Prometheus metrics registration should succeed at startup");

    /// Failed ledger operations (labels: kind)
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ledger_errors_total",
        "Total number of failed ledger operations by error kind",
        &["kind"]
    )
    .expect("Prometheus metrics registration should succeed at startup");
}

pub fn record_view() {
    VIEWS_TOTAL.inc();
}

pub fn record_save_toggle(result: &str) {
    SAVE_TOGGLES_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_delete(result: &str) {
    DELETES_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_error(kind: &str) {
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

/// Serve all registered metrics in the Prometheus text format
pub async fn serve_metrics() -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}
