//! Prometheus Metrics
//!
//! Process-wide collectors registered in the default registry on first use
//! and exposed as text on `/metrics` by both HTTP surfaces.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

use crate::error::{Error, Result};

/// Cluster cache operations by operation and outcome
pub static CACHE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ringcache_cache_requests_total",
        "Cluster cache operations",
        &["operation", "outcome"]
    )
    .expect("static metric definition")
});

/// Rebalance runs by direction and final state
pub static REBALANCES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ringcache_rebalance_total",
        "Rebalance runs",
        &["direction", "outcome"]
    )
    .expect("static metric definition")
});

pub static KEYS_MOVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ringcache_rebalance_keys_moved_total",
        "Keys copied by rebalancing",
        &["direction"]
    )
    .expect("static metric definition")
});

pub static STATUS_CHANGES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ringcache_node_status_changes_total",
        "Node status transitions observed by the health monitor",
        &["status"]
    )
    .expect("static metric definition")
});

pub static REGISTERED_MASTERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("ringcache_registered_masters", "Masters on the hash ring")
        .expect("static metric definition")
});

pub static HEALTH_POLL_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "ringcache_health_poll_duration_seconds",
        "Duration of one health monitor pass"
    )
    .expect("static metric definition")
});

/// Items held by this node's store
pub static STORE_ITEMS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("ringcache_store_items", "Items held by the local cache store")
        .expect("static metric definition")
});

pub fn record_cache_request(operation: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    CACHE_REQUESTS.with_label_values(&[operation, outcome]).inc();
}

/// Encode every registered metric family in the text exposition format
pub fn gather() -> Result<(String, Vec<u8>)> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
    Ok((encoder.format_type().to_string(), buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_touched_metrics() {
        record_cache_request("read", true);
        REGISTERED_MASTERS.set(3);

        let (content_type, body) = gather().unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("ringcache_cache_requests_total"));
        assert!(text.contains("ringcache_registered_masters"));
    }
}
