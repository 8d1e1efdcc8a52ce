//! Metric registration for the pipeline.
//!
//! Uses the `metrics` facade; the binary decides which exporter (if any) to
//! install. Engines emit through `counter!`/`histogram!` directly — this
//! module only attaches descriptions so scrapes are self-documenting.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Registers descriptions for every metric the pipeline emits.
///
/// Call once at startup, before the engines spawn.
pub fn register_pipeline_metrics() {
    describe_counter!("ns_packets_total", "Packets ingested from the source");
    describe_counter!(
        "ns_packets_malformed_total",
        "Packets dropped by validation"
    );
    describe_counter!(
        "ns_flows_evicted_total",
        "Flows evicted by idle timeout or LRU pressure"
    );
    describe_counter!("ns_alerts_emitted_total", "Alerts published by detection");
    describe_counter!(
        "ns_alerts_suppressed_total",
        "Scored flows below the emit threshold"
    );
    describe_counter!(
        "ns_scorer_errors_total",
        "Scoring batches discarded after a scorer error"
    );
    describe_counter!("ns_bus_dropped_total", "Bus payloads dropped on backpressure");
    describe_counter!(
        "ns_persist_failures_total",
        "Records dropped after the persist retry was exhausted"
    );
    describe_counter!("ns_ti_cache_hits_total", "TI lookups answered from cache");
    describe_counter!(
        "ns_ti_provider_errors_total",
        "TI provider calls that returned an error"
    );
    describe_counter!(
        "ns_ti_rate_limited_total",
        "TI provider calls skipped by the local rate limiter"
    );
    describe_counter!("ns_actions_executed_total", "Actions dispatched by response");
    describe_counter!(
        "ns_actions_downgraded_total",
        "Actions downgraded by the safety gate"
    );
    describe_counter!("ns_actions_reverted_total", "Actions reverted on request");

    describe_gauge!("ns_flows_tracked", "Flows currently tracked by detection");

    describe_histogram!(
        "ns_detection_latency_seconds",
        "Packet arrival to alert publish"
    );
    describe_histogram!(
        "ns_investigation_latency_seconds",
        "Alert receipt to report publish"
    );
    describe_histogram!(
        "ns_action_latency_seconds",
        "Report receipt to action record publish"
    );
}
