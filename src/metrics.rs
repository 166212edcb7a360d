use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Register metric descriptions (safe to call multiple times).
///
/// The crate only emits through the `metrics` facade; wiring an exporter is
/// the embedding application's concern.
pub fn init_metric_descriptions() {
    describe_counter!("ogem_requests_total", "Total chat completion requests per endpoint");
    describe_counter!("ogem_cooldowns_total", "Cooldowns armed per endpoint");
    describe_histogram!("ogem_request_duration_seconds", "Upstream request duration");
    describe_histogram!("ogem_batch_dispatch_size", "Jobs per dispatched upstream batch");
    describe_gauge!("ogem_endpoint_healthy", "Endpoint ping health (1 healthy, 0 failed)");
}

/// Record a request outcome ("success", "quota", "failure")
pub fn record_request(provider: &str, region: &str, model: &str, outcome: &str) {
    counter!(
        "ogem_requests_total",
        "provider" => provider.to_string(),
        "region" => region.to_string(),
        "model" => model.to_string(),
        "outcome" => outcome.to_string(),
    )
    .increment(1);
}

/// Record a cooldown being armed for an endpoint
pub fn record_cooldown(provider: &str, region: &str, model: &str) {
    counter!(
        "ogem_cooldowns_total",
        "provider" => provider.to_string(),
        "region" => region.to_string(),
        "model" => model.to_string(),
    )
    .increment(1);
}

pub fn record_duration(provider: &str, region: &str, model: &str, duration: Duration) {
    histogram!(
        "ogem_request_duration_seconds",
        "provider" => provider.to_string(),
        "region" => region.to_string(),
        "model" => model.to_string(),
    )
    .record(duration.as_secs_f64());
}

pub fn record_batch_dispatch(size: usize) {
    histogram!("ogem_batch_dispatch_size").record(size as f64);
}

pub fn update_endpoint_health(provider: &str, region: &str, model: &str, healthy: bool) {
    gauge!(
        "ogem_endpoint_healthy",
        "provider" => provider.to_string(),
        "region" => region.to_string(),
        "model" => model.to_string(),
    )
    .set(if healthy { 1.0 } else { 0.0 });
}
