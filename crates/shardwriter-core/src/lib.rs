//! Shardwriter Core - client-side write distribution for token-ring clusters
//!
//! This library routes a stream of records to the shards (token ranges) of a
//! partitioned, replicated storage cluster:
//!
//! - Row keys derived from named key columns (single and composite keys)
//! - One background client per range with ordered replica failover
//! - Opportunistic batching of queued writes per connection
//! - Per-connection prepared statement cache
//! - Drain-before-exit shutdown with aggregated shard failures

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod metrics;
pub mod prepared;
pub mod progress;
pub mod ring;
pub mod row_key;
pub mod transport;

// Re-export commonly used types
pub use config::{Config, ConsistencyLevel, OutputConfig};
pub use engine::{RangeClient, ShutdownCoordinator, WriteRouter, WriteRouterBuilder};
pub use error::{CloseError, ErrorKind, ShardError, TransportError};
pub use error::{Error, Result};
pub use progress::Progress;
pub use ring::{PartitionRange, RingLookup, StaticRing, Token};
pub use row_key::{KeyLayout, RowKey, RowKeyBuilder};
pub use transport::{Connection, ConnectionFactory, Endpoint};
