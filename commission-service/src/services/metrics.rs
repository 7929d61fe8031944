//! Prometheus metrics for commission-service.

use once_cell::sync::Lazy;
use service_core::error::AppError;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "commission_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for commission records created by the generator.
pub static COMMISSIONS_GENERATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "commission_records_generated_total",
        "Total number of commission records generated",
        &["record_type"]
    )
    .expect("Failed to register COMMISSIONS_GENERATED")
});

/// Counter for verification runs by outcome.
pub static VERIFICATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "commission_verifications_total",
        "Total number of commission verification runs",
        &["trigger", "outcome"]
    )
    .expect("Failed to register VERIFICATIONS")
});

/// Counter for installment-paid events by outcome.
pub static EVENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "commission_payment_events_total",
        "Total number of installment paid events handled",
        &["outcome"]
    )
    .expect("Failed to register EVENTS")
});

/// Counter for sweep items by outcome.
pub static SWEEP_ITEMS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "commission_sweep_items_total",
        "Total number of commissions processed by the verification sweep",
        &["outcome"]
    )
    .expect("Failed to register SWEEP_ITEMS")
});

/// Counter for rule-engine lookups that fell back to the rate table.
pub static RATE_FALLBACKS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "commission_rate_fallbacks_total",
        "Total number of rate resolutions that fell back to the rate table",
        &["reason"]
    )
    .expect("Failed to register RATE_FALLBACKS")
});

/// Counter for administrative operations.
pub static ADMIN_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "commission_admin_operations_total",
        "Total number of administrative commission operations",
        &["operation", "status"]
    )
    .expect("Failed to register ADMIN_OPERATIONS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "commission_errors_total",
        "Total number of errors",
        &["operation", "error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&COMMISSIONS_GENERATED);
    Lazy::force(&VERIFICATIONS);
    Lazy::force(&EVENTS);
    Lazy::force(&SWEEP_ITEMS);
    Lazy::force(&RATE_FALLBACKS);
    Lazy::force(&ADMIN_OPERATIONS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record generated commission records.
pub fn record_generated(record_type: &str, count: usize) {
    COMMISSIONS_GENERATED
        .with_label_values(&[record_type])
        .inc_by(count as f64);
}

/// Record a verification run.
pub fn record_verification(trigger: &str, outcome: &str) {
    VERIFICATIONS.with_label_values(&[trigger, outcome]).inc();
}

/// Record a handled payment event.
pub fn record_event(outcome: &str) {
    EVENTS.with_label_values(&[outcome]).inc();
}

/// Record a sweep item.
pub fn record_sweep_item(outcome: &str) {
    SWEEP_ITEMS.with_label_values(&[outcome]).inc();
}

/// Record a fallback to the rate table.
pub fn record_rate_fallback(reason: &str) {
    RATE_FALLBACKS.with_label_values(&[reason]).inc();
}

/// Record an administrative operation.
pub fn record_admin_operation(operation: &str, status: &str) {
    ADMIN_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Record a failed operation, labelled by the error kind.
pub fn record_error(operation: &str, error: &AppError) {
    ERRORS.with_label_values(&[operation, error.kind()]).inc();
}
