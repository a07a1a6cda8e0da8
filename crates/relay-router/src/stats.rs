//! Per-destination dispatch counters.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Counts successful dispatches per destination identity. Safe for
/// concurrent increment from multiple dispatch tasks and never blocks the
/// dispatch path. The counter's lifetime is owned by whoever wires it into
/// the router; the router only increments.
#[derive(Debug, Default)]
pub struct RouterStatistics {
    enabled: AtomicBool,
    routed: DashMap<String, AtomicU64>,
}

impl RouterStatistics {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            routed: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Count one successfully routed message for `route`. No-op while
    /// disabled.
    pub fn increment_routed(&self, route: &str) {
        if !self.is_enabled() {
            return;
        }
        self.routed
            .entry(route.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn routed_count(&self, route: &str) -> u64 {
        self.routed
            .get(route)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of all counters, for monitoring surfaces.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.routed
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_per_route() {
        let stats = RouterStatistics::new();
        stats.increment_routed("a");
        stats.increment_routed("a");
        stats.increment_routed("b");

        assert_eq!(stats.routed_count("a"), 2);
        assert_eq!(stats.routed_count("b"), 1);
        assert_eq!(stats.routed_count("missing"), 0);
    }

    #[test]
    fn disabled_statistics_ignore_increments() {
        let stats = RouterStatistics::new();
        stats.set_enabled(false);
        stats.increment_routed("a");
        assert_eq!(stats.routed_count("a"), 0);
    }

    #[test]
    fn snapshot_copies_all_counters() {
        let stats = RouterStatistics::new();
        stats.increment_routed("a");
        stats.increment_routed("b");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.get("a"), Some(&1));
        assert_eq!(snapshot.get("b"), Some(&1));
    }
}
