//! Metrics hooks for the routing engine.
//!
//! Emits through the `metrics` facade; binding an exporter is the embedding
//! service's concern.

use metrics::{counter, histogram};
use std::time::Duration;

/// Record a successful dispatch to a route.
pub fn record_route_dispatched(route: &str, awaited_reply: bool) {
    counter!(
        "relay_routes_dispatched_total",
        "route" => route.to_string(),
        "awaited_reply" => awaited_reply.to_string()
    )
    .increment(1);
}

/// Record a failed dispatch to a route.
pub fn record_dispatch_failed(route: &str) {
    counter!(
        "relay_dispatch_failures_total",
        "route" => route.to_string()
    )
    .increment(1);
}

/// Record how long one dispatch leg took.
pub fn record_dispatch_latency(route: &str, duration: Duration) {
    histogram!(
        "relay_dispatch_duration_seconds",
        "route" => route.to_string()
    )
    .record(duration.as_secs_f64());
}
