//! Per-connection prepared statement handles.
//!
//! A prepared handle is only valid on the connection that produced it, so the
//! cache is keyed by [`ConnectionId`]. One cache is shared by all range
//! clients of a router; each connection belongs to exactly one client.

use crate::metrics::WriterMetrics;
use crate::transport::{ActiveConnection, ConnectionId, PreparedId};
use crate::TransportError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Connection to prepared handle mapping for one statement.
pub struct PreparedStatementCache {
    statement: String,
    handles: DashMap<ConnectionId, PreparedId>,
    prepares: AtomicU64,
    metrics: Option<Arc<WriterMetrics>>,
}

impl PreparedStatementCache {
    /// Create an empty cache for `statement`.
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            handles: DashMap::new(),
            prepares: AtomicU64::new(0),
            metrics: None,
        }
    }

    /// Count prepares into `metrics` as well.
    pub fn with_metrics(mut self, metrics: Arc<WriterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The statement text being prepared.
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// Cached handle for a connection, if any.
    pub fn get(&self, connection: ConnectionId) -> Option<PreparedId> {
        self.handles.get(&connection).map(|entry| *entry)
    }

    /// Return the connection's handle, preparing the statement on a miss.
    ///
    /// A prepare failure leaves the cache untouched.
    pub async fn get_or_prepare(
        &self,
        connection: &mut ActiveConnection,
    ) -> std::result::Result<PreparedId, TransportError> {
        if let Some(id) = self.get(connection.id()) {
            return Ok(id);
        }

        let id = connection.prepare(&self.statement).await?;
        self.prepares.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_prepare();
        }
        debug!(
            endpoint = %connection.endpoint(),
            connection_id = connection.id().as_u64(),
            prepared_id = id.0,
            "Statement prepared"
        );

        Ok(self.insert_if_absent(connection.id(), id))
    }

    /// Store `id` unless the connection already has a handle; returns the
    /// handle that ends up cached.
    pub fn insert_if_absent(&self, connection: ConnectionId, id: PreparedId) -> PreparedId {
        *self.handles.entry(connection).or_insert(id)
    }

    /// Forget a connection's handle.
    pub fn evict(&self, connection: ConnectionId) -> Option<PreparedId> {
        self.handles.remove(&connection).map(|(_, id)| id)
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Total prepares issued through this cache.
    pub fn prepare_count(&self) -> u64 {
        self.prepares.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PreparedStatementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatementCache")
            .field("statement", &self.statement)
            .field("handles", &self.handles.len())
            .finish()
    }
}
