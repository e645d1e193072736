// Metrics and observability module
// This file handles collection and reporting of performance metrics,
// statistics, and monitoring data for the bridge engine
//
// Numan Thabit 2025 Nov

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

pub static RPC_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "bridge_rpc_latency_seconds",
        "latency for chain RPC calls",
        &["endpoint", "method"]
    )
    .unwrap()
});

pub static RPC_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bridge_rpc_errors_total",
        "chain RPC errors by endpoint",
        &["endpoint", "method"]
    )
    .unwrap()
});

pub static DISPATCH_PHASES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bridge_dispatch_phases_total",
        "adaptive dispatch phase transitions",
        &["phase"]
    )
    .unwrap()
});

pub static CACHE_HITS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bridge_cache_hits_total",
        "read-through cache hits by cache name",
        &["cache"]
    )
    .unwrap()
});
