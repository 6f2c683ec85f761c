use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

static RECORDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "item_relay_records_total",
            "Queue records handled, by processor and outcome",
        ),
        &["processor", "outcome"],
    )
    .expect("failed to create item_relay_records_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register item_relay_records_total");
    counter
});

static PUSHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "item_relay_pushes_total",
            "WebSocket push attempts, by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create item_relay_pushes_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register item_relay_pushes_total");
    counter
});

static CONNECTIONS_PRUNED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "item_relay_connections_pruned_total",
        "Registry entries removed after a push found the connection gone",
    )
    .expect("failed to create item_relay_connections_pruned_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register item_relay_connections_pruned_total");
    counter
});

static WS_SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "item_relay_ws_sessions_active",
        "WebSocket sessions attached to this process",
    )
    .expect("failed to create item_relay_ws_sessions_active");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register item_relay_ws_sessions_active");
    gauge
});

pub fn record_outcome(processor: &str, outcome: &str) {
    RECORDS_TOTAL.with_label_values(&[processor, outcome]).inc();
}

pub fn record_push(outcome: &str) {
    PUSHES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_prune() {
    CONNECTIONS_PRUNED_TOTAL.inc();
}

pub fn set_active_sessions(count: usize) {
    WS_SESSIONS_ACTIVE.set(count as i64);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
