//! Write path metrics.

mod prometheus;

pub use prometheus::{RunSizeHistogram, WriterMetrics};
