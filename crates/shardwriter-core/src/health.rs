//! Health tracking for range clients.
//!
//! Each shard is registered under its range's display form (`(start, end]`).

use crate::ring::PartitionRange;
use crate::transport::Endpoint;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Health status of one shard.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardStatus {
    /// Registered, no connection yet
    Pending,
    /// Connected to an endpoint
    Connected(String),
    /// Operational after failing over away from a candidate
    Degraded(String),
    /// Terminal failure
    Failed(String),
    /// Closed cleanly
    Closed,
}

/// Overall router health status.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// All shards healthy
    Healthy,
    /// Some shards failed over
    Degraded,
    /// At least one shard failed
    Unhealthy,
}

/// Health registry shared by a router and its range clients.
pub struct HealthCheck {
    shards: RwLock<HashMap<String, ShardStatus>>,
    accepting: RwLock<bool>,
}

impl HealthCheck {
    /// Create a new health registry.
    pub fn new() -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            accepting: RwLock::new(false),
        }
    }

    /// Register a shard to track.
    pub fn register_shard(&self, range: &PartitionRange) {
        self.set(range, ShardStatus::Pending);
    }

    /// Mark a shard as connected to `endpoint`.
    ///
    /// A degraded shard stays degraded until it is closed.
    pub fn mark_connected(&self, range: &PartitionRange, endpoint: &Endpoint) {
        let mut shards = self.shards.write();
        let key = range.to_string();
        if !matches!(shards.get(&key), Some(ShardStatus::Degraded(_))) {
            shards.insert(key, ShardStatus::Connected(endpoint.to_string()));
        }
    }

    /// Mark a shard as having abandoned `endpoint`.
    pub fn mark_failover(&self, range: &PartitionRange, endpoint: &Endpoint, reason: &str) {
        self.set(
            range,
            ShardStatus::Degraded(format!("failed over from {endpoint}: {reason}")),
        );
    }

    /// Mark a shard as terminally failed.
    pub fn mark_failed(&self, range: &PartitionRange, reason: &str) {
        self.set(range, ShardStatus::Failed(reason.to_string()));
    }

    /// Mark a shard as closed. Failed shards keep their failure.
    pub fn mark_closed(&self, range: &PartitionRange) {
        let mut shards = self.shards.write();
        let key = range.to_string();
        if !matches!(shards.get(&key), Some(ShardStatus::Failed(_))) {
            shards.insert(key, ShardStatus::Closed);
        }
    }

    fn set(&self, range: &PartitionRange, status: ShardStatus) {
        self.shards.write().insert(range.to_string(), status);
    }

    /// Get the status of a specific shard.
    pub fn shard_status(&self, range: &PartitionRange) -> Option<ShardStatus> {
        self.shards.read().get(&range.to_string()).cloned()
    }

    /// Get all shard statuses keyed by range.
    pub fn all_statuses(&self) -> HashMap<String, ShardStatus> {
        self.shards.read().clone()
    }

    /// Get overall health status.
    pub fn overall_status(&self) -> HealthStatus {
        let shards = self.shards.read();
        let mut has_degraded = false;

        for status in shards.values() {
            match status {
                ShardStatus::Failed(_) => return HealthStatus::Unhealthy,
                ShardStatus::Degraded(_) => has_degraded = true,
                _ => {}
            }
        }

        if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Check if the router is operational (healthy or degraded).
    pub fn is_operational(&self) -> bool {
        matches!(
            self.overall_status(),
            HealthStatus::Healthy | HealthStatus::Degraded
        )
    }

    /// Mark the router as accepting writes.
    pub fn router_opened(&self) {
        *self.accepting.write() = true;
    }

    /// Mark the router as closed.
    pub fn router_closed(&self) {
        *self.accepting.write() = false;
    }

    /// Whether the router accepts writes.
    pub fn is_accepting(&self) -> bool {
        *self.accepting.read()
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::Token;

    fn range(end: i64) -> PartitionRange {
        PartitionRange::new(Token(0), Token(end))
    }

    #[test]
    fn test_shard_lifecycle() {
        let health = HealthCheck::new();
        let r = range(10);
        health.register_shard(&r);
        assert_eq!(health.shard_status(&r), Some(ShardStatus::Pending));

        health.mark_connected(&r, &Endpoint::new("a", 9160));
        assert_eq!(
            health.shard_status(&r),
            Some(ShardStatus::Connected("a:9160".into()))
        );
        assert_eq!(health.overall_status(), HealthStatus::Healthy);

        health.mark_failover(&r, &Endpoint::new("a", 9160), "refused");
        assert_eq!(health.overall_status(), HealthStatus::Degraded);
        assert!(health.is_operational());

        // still degraded after reconnecting elsewhere
        health.mark_connected(&r, &Endpoint::new("b", 9160));
        assert!(matches!(
            health.shard_status(&r),
            Some(ShardStatus::Degraded(_))
        ));

        health.mark_failed(&r, "exhausted");
        assert_eq!(health.overall_status(), HealthStatus::Unhealthy);
        assert!(!health.is_operational());

        health.mark_closed(&r);
        assert!(matches!(health.shard_status(&r), Some(ShardStatus::Failed(_))));
    }

    #[test]
    fn test_health_default() {
        let health = HealthCheck::default();
        assert_eq!(health.overall_status(), HealthStatus::Healthy);
        assert!(health.all_statuses().is_empty());
        assert_eq!(health.shard_status(&range(1)), None);
    }

    #[test]
    fn test_status_priority() {
        let health = HealthCheck::new();
        for end in 1..=3 {
            health.register_shard(&range(end));
        }

        health.mark_failover(&range(2), &Endpoint::new("a", 1), "slow");
        assert_eq!(health.overall_status(), HealthStatus::Degraded);

        health.mark_failed(&range(3), "down");
        assert_eq!(health.overall_status(), HealthStatus::Unhealthy);

        let statuses = health.all_statuses();
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses.get("(0, 1]"), Some(&ShardStatus::Pending));
    }

    #[test]
    fn test_router_accepting() {
        let health = HealthCheck::new();
        assert!(!health.is_accepting());
        health.router_opened();
        assert!(health.is_accepting());
        health.router_closed();
        assert!(!health.is_accepting());
    }
}
