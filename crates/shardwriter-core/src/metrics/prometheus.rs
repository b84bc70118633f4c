//! Prometheus metrics export.

use crate::error::ErrorKind;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

/// Histogram bucket boundaries for the number of executes per connection run.
const RUN_SIZE_BUCKETS: [u64; 8] = [1, 2, 4, 8, 16, 32, 64, 128];

/// Write router metrics with counters, gauges, and a run size histogram.
///
/// Shared between the router and every range client through an `Arc`.
pub struct WriterMetrics {
    // === COUNTERS ===
    /// Writes accepted by the router
    writes_accepted: AtomicU64,

    /// Writes accepted after their shard had already failed
    writes_dropped: AtomicU64,

    /// Queued writes left behind by a failing shard
    writes_abandoned: AtomicU64,

    /// Successful executes
    executes_total: AtomicU64,

    /// Statement prepares issued
    prepares_total: AtomicU64,

    /// Connections opened by range clients
    connections_total: AtomicU64,

    /// Moves to the next candidate endpoint
    failovers_total: AtomicU64,

    /// Transport errors by kind
    errors_transient: AtomicU64,
    errors_non_retryable: AtomicU64,

    /// Range clients created
    shards_created: AtomicU64,

    /// Range clients that reached a terminal failure
    shards_failed: AtomicU64,

    // === GAUGES ===
    /// Range clients currently running
    shards_active: AtomicU64,

    // === HISTOGRAM: run_size ===
    run_size_sum: AtomicU64,
    run_size_count: AtomicU64,
    /// Buckets: [1, 2, 4, 8, 16, 32, 64, 128, +Inf]
    run_size_buckets: [AtomicU64; 9],
}

impl WriterMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            writes_accepted: AtomicU64::new(0),
            writes_dropped: AtomicU64::new(0),
            writes_abandoned: AtomicU64::new(0),
            executes_total: AtomicU64::new(0),
            prepares_total: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            failovers_total: AtomicU64::new(0),
            errors_transient: AtomicU64::new(0),
            errors_non_retryable: AtomicU64::new(0),
            shards_created: AtomicU64::new(0),
            shards_failed: AtomicU64::new(0),
            shards_active: AtomicU64::new(0),
            run_size_sum: AtomicU64::new(0),
            run_size_count: AtomicU64::new(0),
            run_size_buckets: Default::default(),
        }
    }

    // === COUNTER RECORDING ===

    pub fn record_accepted(&self) {
        self.writes_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.writes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self, count: u64) {
        self.writes_abandoned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_execute(&self) {
        self.executes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prepare(&self) {
        self.prepares_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failover(&self) {
        self.failovers_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transport error under its kind label.
    pub fn record_error(&self, kind: ErrorKind) {
        match kind {
            ErrorKind::Transient => self.errors_transient.fetch_add(1, Ordering::Relaxed),
            ErrorKind::NonRetryable => self.errors_non_retryable.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a range client start.
    pub fn record_shard_started(&self) {
        self.shards_created.fetch_add(1, Ordering::Relaxed);
        self.shards_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a range client worker exit.
    pub fn record_shard_stopped(&self, failed: bool) {
        if failed {
            self.shards_failed.fetch_add(1, Ordering::Relaxed);
        }
        // never underflow if a stop is reported twice
        let _ = self
            .shards_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Record the number of executes done on one connection acquisition.
    pub fn record_run(&self, size: usize) {
        let size = size as u64;
        self.run_size_sum.fetch_add(size, Ordering::Relaxed);
        self.run_size_count.fetch_add(1, Ordering::Relaxed);

        for (i, &bound) in RUN_SIZE_BUCKETS.iter().enumerate() {
            if size <= bound {
                self.run_size_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.run_size_buckets[RUN_SIZE_BUCKETS.len()].fetch_add(1, Ordering::Relaxed);
    }

    // === GETTERS ===

    pub fn writes_accepted(&self) -> u64 {
        self.writes_accepted.load(Ordering::Relaxed)
    }

    pub fn writes_dropped(&self) -> u64 {
        self.writes_dropped.load(Ordering::Relaxed)
    }

    pub fn writes_abandoned(&self) -> u64 {
        self.writes_abandoned.load(Ordering::Relaxed)
    }

    pub fn executes_total(&self) -> u64 {
        self.executes_total.load(Ordering::Relaxed)
    }

    pub fn prepares_total(&self) -> u64 {
        self.prepares_total.load(Ordering::Relaxed)
    }

    pub fn connections_total(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    pub fn failovers_total(&self) -> u64 {
        self.failovers_total.load(Ordering::Relaxed)
    }

    /// Transport error count for one kind.
    pub fn errors_by_kind(&self, kind: ErrorKind) -> u64 {
        match kind {
            ErrorKind::Transient => self.errors_transient.load(Ordering::Relaxed),
            ErrorKind::NonRetryable => self.errors_non_retryable.load(Ordering::Relaxed),
        }
    }

    pub fn shards_created(&self) -> u64 {
        self.shards_created.load(Ordering::Relaxed)
    }

    pub fn shards_failed(&self) -> u64 {
        self.shards_failed.load(Ordering::Relaxed)
    }

    pub fn shards_active(&self) -> u64 {
        self.shards_active.load(Ordering::Relaxed)
    }

    /// Snapshot of the run size histogram.
    pub fn run_size_histogram(&self) -> RunSizeHistogram {
        let mut buckets = [(0u64, 0u64); 8];
        for (i, &bound) in RUN_SIZE_BUCKETS.iter().enumerate() {
            buckets[i] = (bound, self.run_size_buckets[i].load(Ordering::Relaxed));
        }
        RunSizeHistogram {
            sum: self.run_size_sum.load(Ordering::Relaxed),
            count: self.run_size_count.load(Ordering::Relaxed),
            buckets,
            inf_bucket: self.run_size_buckets[RUN_SIZE_BUCKETS.len()].load(Ordering::Relaxed),
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// # Example
    /// ```
    /// use shardwriter_core::metrics::WriterMetrics;
    ///
    /// let metrics = WriterMetrics::new();
    /// metrics.record_accepted();
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("shardwriter_writes_accepted_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix("shardwriter")
    }

    /// Export metrics in Prometheus text format with a custom name prefix.
    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut output = String::with_capacity(4096);

        // === COUNTERS ===
        let counters = [
            ("writes_accepted_total", "Writes accepted by the router", self.writes_accepted()),
            ("writes_dropped_total", "Writes dropped because their shard had failed", self.writes_dropped()),
            ("writes_abandoned_total", "Queued writes abandoned by a failing shard", self.writes_abandoned()),
            ("executes_total", "Successful statement executes", self.executes_total()),
            ("prepares_total", "Statement prepares issued", self.prepares_total()),
            ("connections_total", "Connections opened by range clients", self.connections_total()),
            ("failovers_total", "Moves to the next candidate endpoint", self.failovers_total()),
            ("shards_created_total", "Range clients created", self.shards_created()),
            ("shards_failed_total", "Range clients that failed", self.shards_failed()),
        ];
        for (name, help, value) in counters {
            push_metric(&mut output, prefix, name, help, "counter", value);
        }

        let _ = writeln!(output, "# HELP {prefix}_errors Transport errors by kind");
        let _ = writeln!(output, "# TYPE {prefix}_errors counter");
        for kind in [ErrorKind::Transient, ErrorKind::NonRetryable] {
            let _ = writeln!(
                output,
                "{prefix}_errors{{kind=\"{kind}\"}} {}",
                self.errors_by_kind(kind)
            );
        }
        output.push('\n');

        // === GAUGES ===
        push_metric(
            &mut output,
            prefix,
            "shards_active",
            "Range clients currently running",
            "gauge",
            self.shards_active(),
        );

        // === HISTOGRAM: run_size ===
        let hist = self.run_size_histogram();
        let _ = writeln!(
            output,
            "# HELP {prefix}_run_size Executes per connection acquisition"
        );
        let _ = writeln!(output, "# TYPE {prefix}_run_size histogram");
        for (le, count) in &hist.buckets {
            let _ = writeln!(output, "{prefix}_run_size_bucket{{le=\"{le}\"}} {count}");
        }
        let _ = writeln!(
            output,
            "{prefix}_run_size_bucket{{le=\"+Inf\"}} {}",
            hist.inf_bucket
        );
        let _ = writeln!(output, "{prefix}_run_size_sum {}", hist.sum);
        let _ = writeln!(output, "{prefix}_run_size_count {}", hist.count);

        output
    }
}

fn push_metric(output: &mut String, prefix: &str, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(output, "# HELP {prefix}_{name} {help}");
    let _ = writeln!(output, "# TYPE {prefix}_{name} {kind}");
    let _ = writeln!(output, "{prefix}_{name} {value}");
    output.push('\n');
}

impl Default for WriterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Run size histogram data for export.
#[derive(Debug, Clone)]
pub struct RunSizeHistogram {
    /// Sum of all observed run sizes
    pub sum: u64,
    /// Total count of observations
    pub count: u64,
    /// Bucket counts: (le_boundary, count)
    pub buckets: [(u64, u64); 8],
    /// +Inf bucket count
    pub inf_bucket: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = WriterMetrics::new();

        metrics.record_accepted();
        metrics.record_accepted();
        assert_eq!(metrics.writes_accepted(), 2);

        metrics.record_dropped();
        metrics.record_abandoned(5);
        assert_eq!(metrics.writes_dropped(), 1);
        assert_eq!(metrics.writes_abandoned(), 5);

        metrics.record_error(ErrorKind::Transient);
        metrics.record_error(ErrorKind::Transient);
        metrics.record_error(ErrorKind::NonRetryable);
        assert_eq!(metrics.errors_by_kind(ErrorKind::Transient), 2);
        assert_eq!(metrics.errors_by_kind(ErrorKind::NonRetryable), 1);
    }

    #[test]
    fn test_shard_gauge() {
        let metrics = WriterMetrics::new();

        metrics.record_shard_started();
        metrics.record_shard_started();
        assert_eq!(metrics.shards_active(), 2);
        assert_eq!(metrics.shards_created(), 2);

        metrics.record_shard_stopped(true);
        metrics.record_shard_stopped(false);
        metrics.record_shard_stopped(false);
        assert_eq!(metrics.shards_active(), 0);
        assert_eq!(metrics.shards_failed(), 1);
    }

    #[test]
    fn test_run_size_buckets() {
        let metrics = WriterMetrics::new();

        metrics.record_run(1); // <= 1
        metrics.record_run(3); // <= 4
        metrics.record_run(32); // <= 32
        metrics.record_run(500); // +Inf only

        let hist = metrics.run_size_histogram();
        assert_eq!(hist.count, 4);
        assert_eq!(hist.sum, 536);
        assert_eq!(hist.buckets[0], (1, 1));
        assert_eq!(hist.buckets[1], (2, 1));
        assert_eq!(hist.buckets[2], (4, 2));
        assert_eq!(hist.buckets[5], (32, 3));
        assert_eq!(hist.buckets[7], (128, 3));
        assert_eq!(hist.inf_bucket, 4);
    }

    #[test]
    fn test_prometheus_text_export() {
        let metrics = WriterMetrics::new();

        metrics.record_accepted();
        metrics.record_execute();
        metrics.record_prepare();
        metrics.record_failover();
        metrics.record_error(ErrorKind::Transient);
        metrics.record_shard_started();
        metrics.record_run(2);

        let output = metrics.export_prometheus_text();

        assert!(output.contains("# TYPE shardwriter_writes_accepted_total counter"));
        assert!(output.contains("shardwriter_writes_accepted_total 1"));
        assert!(output.contains("shardwriter_executes_total 1"));
        assert!(output.contains("shardwriter_prepares_total 1"));
        assert!(output.contains("shardwriter_failovers_total 1"));
        assert!(output.contains("shardwriter_errors{kind=\"transient\"} 1"));
        assert!(output.contains("shardwriter_errors{kind=\"non-retryable\"} 0"));
        assert!(output.contains("# TYPE shardwriter_shards_active gauge"));
        assert!(output.contains("shardwriter_shards_active 1"));
        assert!(output.contains("# TYPE shardwriter_run_size histogram"));
        assert!(output.contains("shardwriter_run_size_bucket{le=\"1\"} 0"));
        assert!(output.contains("shardwriter_run_size_bucket{le=\"2\"} 1"));
        assert!(output.contains("shardwriter_run_size_bucket{le=\"+Inf\"} 1"));
        assert!(output.contains("shardwriter_run_size_sum 2"));
        assert!(output.contains("shardwriter_run_size_count 1"));
    }

    #[test]
    fn test_prometheus_text_export_with_prefix() {
        let metrics = WriterMetrics::new();
        metrics.record_execute();

        let output = metrics.export_prometheus_text_with_prefix("loader");
        assert!(output.contains("# HELP loader_executes_total"));
        assert!(output.contains("loader_executes_total 1"));
        assert!(!output.contains("shardwriter_"));
    }

    #[test]
    fn test_prometheus_text_format_validity() {
        let metrics = WriterMetrics::default();
        let output = metrics.export_prometheus_text();

        for line in output.lines().filter(|l| !l.is_empty()) {
            if line.starts_with('#') {
                assert!(line.starts_with("# HELP ") || line.starts_with("# TYPE "));
            } else {
                let value = line.rsplit(' ').next().unwrap();
                assert!(value.parse::<u64>().is_ok(), "bad sample line: {line}");
            }
        }
    }
}
