use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

// ---------------------------------------------------------------------------
// Metrics catalog
// ---------------------------------------------------------------------------

/// Register all metric descriptors at startup.
///
/// Call once, after the recorder is installed and before anything is recorded.
pub fn describe_all_metrics() {
    // -- Cache --
    describe_counter!("wxcache_cache_hits_total", "Buckets served from the cache");
    describe_counter!(
        "wxcache_cache_misses_total",
        "Buckets missing or stale in the cache"
    );
    describe_gauge!("wxcache_cache_entries", "Entries currently held per cache");
    describe_counter!(
        "wxcache_files_rehydrated_total",
        "Bucket files loaded back into a cache from disk"
    );

    // -- Retrieval --
    describe_counter!(
        "wxcache_gaps_requested_total",
        "Coalesced gap requests sent to the storage backend"
    );
    describe_counter!(
        "wxcache_backend_failures_total",
        "Gap requests that failed at the storage backend"
    );
    describe_histogram!(
        "wxcache_backend_fetch_duration_seconds",
        "Storage backend round-trip per gap"
    );
    describe_counter!(
        "wxcache_sentinel_fills_total",
        "Buckets filled with the no-data placeholder"
    );

    // -- Disk --
    describe_counter!("wxcache_files_persisted_total", "Bucket files written to disk");
    describe_counter!(
        "wxcache_disk_write_failures_total",
        "Bucket files that could not be written"
    );
    describe_counter!(
        "wxcache_files_deleted_total",
        "Bucket files deleted, by reason"
    );
    describe_counter!(
        "wxcache_sweep_failures_total",
        "Retention sweeps that could not delete every file"
    );
}

// ---------------------------------------------------------------------------
// Recording helpers
// ---------------------------------------------------------------------------

pub fn inc_cache_hits(cache: &str, count: usize) {
    counter!("wxcache_cache_hits_total", "cache" => cache.to_string()).increment(count as u64);
}

pub fn inc_cache_misses(cache: &str, count: usize) {
    counter!("wxcache_cache_misses_total", "cache" => cache.to_string()).increment(count as u64);
}

pub fn set_cache_entries(cache: &str, count: usize) {
    gauge!("wxcache_cache_entries", "cache" => cache.to_string()).set(count as f64);
}

pub fn inc_files_rehydrated(cache: &str, count: usize) {
    counter!("wxcache_files_rehydrated_total", "cache" => cache.to_string())
        .increment(count as u64);
}

pub fn inc_gaps_requested(kind: &str) {
    counter!("wxcache_gaps_requested_total", "kind" => kind.to_string()).increment(1);
}

pub fn inc_backend_failures(kind: &str) {
    counter!("wxcache_backend_failures_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_backend_fetch_duration(kind: &str, started: Instant) {
    histogram!("wxcache_backend_fetch_duration_seconds", "kind" => kind.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn inc_sentinel_fills(kind: &str, count: usize) {
    if count > 0 {
        counter!("wxcache_sentinel_fills_total", "kind" => kind.to_string())
            .increment(count as u64);
    }
}

pub fn inc_files_persisted(kind: &str) {
    counter!("wxcache_files_persisted_total", "kind" => kind.to_string()).increment(1);
}

pub fn inc_disk_write_failures(kind: &str) {
    counter!("wxcache_disk_write_failures_total", "kind" => kind.to_string()).increment(1);
}

/// `reason` is one of `retention` or `dead_resource`.
pub fn inc_files_deleted(reason: &str, count: usize) {
    if count > 0 {
        counter!("wxcache_files_deleted_total", "reason" => reason.to_string())
            .increment(count as u64);
    }
}

pub fn inc_sweep_failures() {
    counter!("wxcache_sweep_failures_total").increment(1);
}

// ---------------------------------------------------------------------------
// Prometheus recorder installation
// ---------------------------------------------------------------------------

/// Install the global Prometheus recorder.
///
/// With a listen address the exporter also serves `/metrics` over HTTP;
/// without one it only records.
pub fn install_prometheus_recorder(
    listen_addr: Option<SocketAddr>,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    match listen_addr {
        Some(addr) => builder.with_http_listener(addr).install(),
        None => builder.install_recorder().map(|_handle| ()),
    }
}
