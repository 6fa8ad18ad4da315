//! Prometheus metrics for the invoice ledger.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Histogram,
    HistogramVec, TextEncoder,
};

/// Invoice lifecycle events by action.
pub static INVOICE_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_ledger_invoice_events_total",
        "Total number of invoice lifecycle events",
        &["event"] // created, updated, sent, viewed, cancelled, marked_overdue
    )
    .expect("Failed to register invoice_events_total")
});

/// Payment counter by method and outcome.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_ledger_payments_total",
        "Total number of payments by method and status",
        &["method", "status"]
    )
    .expect("Failed to register payments_total")
});

/// Payment amount counter by currency.
pub static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_ledger_payment_amount_total",
        "Total payment amount by currency",
        &["currency"]
    )
    .expect("Failed to register payment_amount_total")
});

/// Gateway webhook deliveries by outcome.
pub static WEBHOOK_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_ledger_webhook_events_total",
        "Total number of gateway webhook deliveries by outcome",
        &["outcome"]
    )
    .expect("Failed to register webhook_events_total")
});

/// Notices dispatched by type and outcome.
pub static NOTICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_ledger_notices_total",
        "Total number of notices by type and outcome",
        &["notice_type", "outcome"]
    )
    .expect("Failed to register notices_total")
});

/// Late fee amount counter by currency.
pub static LATE_FEES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_ledger_late_fee_amount_total",
        "Total late fee amount applied by currency",
        &["currency"]
    )
    .expect("Failed to register late_fee_amount_total")
});

/// Collection run duration.
pub static SCHEDULER_RUN_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "invoice_ledger_scheduler_run_duration_seconds",
        "Collection scheduler run duration in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]
    )
    .expect("Failed to register scheduler_run_duration")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_ledger_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoice_ledger_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&INVOICE_EVENTS_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
    Lazy::force(&WEBHOOK_EVENTS_TOTAL);
    Lazy::force(&NOTICES_TOTAL);
    Lazy::force(&LATE_FEES_TOTAL);
    Lazy::force(&SCHEDULER_RUN_DURATION);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

/// Count an error of `error_type` on `ERRORS_TOTAL`.
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Add a decimal amount to a float counter.
pub fn add_amount(counter: &CounterVec, label: &str, amount: rust_decimal::Decimal) {
    use rust_decimal::prelude::ToPrimitive;
    if let Some(value) = amount.to_f64() {
        counter.with_label_values(&[label]).inc_by(value.max(0.0));
    }
}
