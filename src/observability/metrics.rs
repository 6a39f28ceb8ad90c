// ============================================================================
// PROMETHEUS METRICS
// ============================================================================
// Métricas HTTP, del pool y del flujo de tokens de encuesta
// ============================================================================

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

lazy_static! {
    // ========================================================================
    // HTTP REQUEST METRICS
    // ========================================================================

    /// Total de requests HTTP por método, endpoint y status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "endpoint"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0]
    )
    .unwrap();

    // ========================================================================
    // DATABASE POOL
    // ========================================================================

    pub static ref DB_CONNECTIONS_ACTIVE: IntGaugeVec = register_int_gauge_vec!(
        "db_connections_active",
        "Number of active database connections",
        &["pool"]
    )
    .unwrap();

    pub static ref DB_CONNECTIONS_IDLE: IntGaugeVec = register_int_gauge_vec!(
        "db_connections_idle",
        "Number of idle database connections",
        &["pool"]
    )
    .unwrap();

    // ========================================================================
    // SURVEY TOKENS
    // ========================================================================

    /// Tokens emitidos (status: success | error)
    pub static ref TOKENS_ISSUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "survey_tokens_issued_total",
        "Total one-time survey tokens issued",
        &["status"]
    )
    .unwrap();

    /// Resultado de cada visita a una URL de redención
    pub static ref REDEMPTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "survey_redemptions_total",
        "Total redemption attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref TOKEN_OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "survey_token_operation_duration_seconds",
        "Issue/redeem operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]
    )
    .unwrap();

    /// QR renderizados (format: png)
    pub static ref QR_CODES_GENERATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "survey_qr_codes_generated_total",
        "Total QR codes rendered",
        &["format"]
    )
    .unwrap();

    // ========================================================================
    // RATE LIMITING
    // ========================================================================

    pub static ref RATE_LIMIT_EXCEEDED: IntCounterVec = register_int_counter_vec!(
        "rate_limit_exceeded_total",
        "Total requests blocked by rate limiting",
        &["endpoint"]
    )
    .unwrap();
}

/// Helper para registrar una request HTTP
pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration_secs);
}

pub fn record_pool_usage(pool: &str, size: u32, idle: usize) {
    let idle = idle as i64;
    DB_CONNECTIONS_IDLE.with_label_values(&[pool]).set(idle);
    DB_CONNECTIONS_ACTIVE
        .with_label_values(&[pool])
        .set((i64::from(size) - idle).max(0));
}

pub fn record_token_issued(success: bool) {
    let status = if success { "success" } else { "error" };
    TOKENS_ISSUED_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_redemption_outcome(outcome: &str) {
    REDEMPTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Helper para registrar generación de QR
pub fn record_qr_generated(format: &str) {
    QR_CODES_GENERATED_TOTAL.with_label_values(&[format]).inc();
}

pub fn record_rate_limited(endpoint: &str) {
    RATE_LIMIT_EXCEEDED.with_label_values(&[endpoint]).inc();
}
