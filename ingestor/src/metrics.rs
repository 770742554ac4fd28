use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref SAMPLES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "fuelwatch_samples_total",
        "Total telemetry samples received (HTTP and MQTT)"
    ))
    .unwrap();
    pub static ref VALID_SAMPLES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "fuelwatch_valid_samples_total",
        "Total samples persisted after validation"
    ))
    .unwrap();
    pub static ref INVALID_SAMPLES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "fuelwatch_invalid_samples_total",
        "Total samples rejected"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "fuelwatch_db_failures_total",
        "Total database statement failures"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "fuelwatch_ingest_latency_seconds",
            "Time taken to persist, publish and evaluate one sample"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref ANALYZER_EVALUATIONS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "fuelwatch_analyzer_evaluations_total",
        "Total trend analyses run"
    ))
    .unwrap();
    pub static ref DEBOUNCED_EVALUATIONS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "fuelwatch_debounced_evaluations_total",
        "Evaluations skipped by the per-device debounce window"
    ))
    .unwrap();
    pub static ref ALERTS_RAISED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "fuelwatch_alerts_raised_total",
        "Low-autonomy alerts raised"
    ))
    .unwrap();
    pub static ref ALERTS_RESOLVED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "fuelwatch_alerts_resolved_total",
        "Low-autonomy alerts cleared"
    ))
    .unwrap();
    pub static ref HUB_SUBSCRIBERS: Gauge = Gauge::with_opts(Opts::new(
        "fuelwatch_hub_subscribers",
        "Live broadcast subscribers"
    ))
    .unwrap();
    pub static ref HUB_EVICTIONS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "fuelwatch_hub_evictions_total",
        "Subscribers evicted because their queue was full"
    ))
    .unwrap();
    pub static ref CHANNEL_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "fuelwatch_channel_full_total",
        "Total number of times the MQTT intake channel was full (backpressure events)"
    ))
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(SAMPLES_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(VALID_SAMPLES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INVALID_SAMPLES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DB_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INGEST_LATENCY_SECONDS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ANALYZER_EVALUATIONS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DEBOUNCED_EVALUATIONS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ALERTS_RAISED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ALERTS_RESOLVED_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(HUB_SUBSCRIBERS.clone())).unwrap();
    REGISTRY
        .register(Box::new(HUB_EVICTIONS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CHANNEL_FULL_TOTAL.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
