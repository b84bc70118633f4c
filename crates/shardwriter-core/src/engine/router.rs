//! Record router.
//!
//! Builds the row key of each record, resolves its owning range through the
//! ring, and hands the write to that range's client. Clients are created the
//! first time a range is observed and live until [`WriteRouter::close`].

use super::queue::PendingWrite;
use super::range_client::{ClientContext, RangeClient};
use super::shutdown::ShutdownCoordinator;
use crate::config::OutputConfig;
use crate::error::CloseError;
use crate::health::HealthCheck;
use crate::metrics::WriterMetrics;
use crate::prepared::PreparedStatementCache;
use crate::progress::{NoProgress, Progress};
use crate::ring::{PartitionRange, RingLookup};
use crate::row_key::{KeyLayout, RowKeyBuilder};
use crate::transport::{ActiveConnection, ConnectionFactory, Endpoint};
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builder for [`WriteRouter`].
pub struct WriteRouterBuilder {
    config: OutputConfig,
    factory: Arc<dyn ConnectionFactory>,
    ring: Arc<dyn RingLookup>,
    progress: Option<Arc<dyn Progress>>,
    key_layout: Option<KeyLayout>,
    metrics: Option<Arc<WriterMetrics>>,
    health: Option<Arc<HealthCheck>>,
}

impl WriteRouterBuilder {
    /// Create a builder.
    pub fn new(
        config: OutputConfig,
        factory: Arc<dyn ConnectionFactory>,
        ring: Arc<dyn RingLookup>,
    ) -> Self {
        Self {
            config,
            factory,
            ring,
            progress: None,
            key_layout: None,
            metrics: None,
            health: None,
        }
    }

    /// Signal called once per accepted write.
    pub fn with_progress(mut self, progress: impl Progress + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Use an explicit key layout instead of the configured or discovered one.
    pub fn with_key_layout(mut self, layout: KeyLayout) -> Self {
        self.key_layout = Some(layout);
        self
    }

    /// Share metrics with the caller.
    pub fn with_metrics(mut self, metrics: Arc<WriterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Share a health registry with the caller.
    pub fn with_health(mut self, health: Arc<HealthCheck>) -> Self {
        self.health = Some(health);
        self
    }

    /// Validate the configuration, resolve the key layout and build the
    /// router.
    pub async fn build(self) -> Result<WriteRouter> {
        self.config.validate()?;

        let layout = match (&self.key_layout, &self.config.key_layout) {
            (Some(layout), _) => layout.clone(),
            (None, Some(configured)) => {
                KeyLayout::parse(&configured.validator, configured.columns.clone())?
            }
            (None, None) => self.discover_key_layout().await?,
        };

        let metrics = self.metrics.unwrap_or_default();
        let health = self.health.unwrap_or_default();
        let statements = Arc::new(
            PreparedStatementCache::new(self.config.statement.clone())
                .with_metrics(metrics.clone()),
        );

        let ctx = ClientContext {
            factory: self.factory,
            statements,
            consistency: self.config.consistency_level,
            batch_threshold: self.config.batch_threshold,
            metrics,
            health,
        };
        ctx.health.router_opened();

        info!(
            keyspace = %self.config.keyspace,
            table = %self.config.table,
            key_columns = ?layout.columns(),
            composite = layout.is_composite(),
            consistency = %self.config.consistency_level,
            batch_threshold = self.config.batch_threshold,
            queue_capacity = ?self.config.queue_capacity,
            "Write router ready"
        );

        Ok(WriteRouter {
            keys: RowKeyBuilder::new(layout),
            ring: self.ring,
            ctx,
            queue_capacity: self.config.queue_capacity,
            progress: self.progress.unwrap_or_else(|| Arc::new(NoProgress)),
            clients: Vec::new(),
            index: HashMap::new(),
            closed: None,
        })
    }

    /// Fetch the key layout from any ring endpoint, then from the seeds.
    async fn discover_key_layout(&self) -> Result<KeyLayout> {
        let mut candidates: Vec<Endpoint> = self.ring.any_endpoint().into_iter().collect();
        for seed in &self.config.endpoints {
            let endpoint = Endpoint::parse(seed, self.config.rpc_port)?;
            if !candidates.contains(&endpoint) {
                candidates.push(endpoint);
            }
        }

        let mut last_error = None;
        for endpoint in candidates {
            let described = match ActiveConnection::open(self.factory.as_ref(), &endpoint).await {
                Ok(mut connection) => {
                    let described = connection
                        .describe_key_layout(&self.config.keyspace, &self.config.table)
                        .await;
                    connection.close().await;
                    described
                }
                Err(err) => Err(err),
            };

            match described {
                Ok(descriptor) => {
                    debug!(
                        endpoint = %endpoint,
                        validator = %descriptor.key_validator,
                        aliases = %descriptor.key_aliases,
                        "Key layout discovered"
                    );
                    return KeyLayout::from_descriptor(&descriptor);
                }
                Err(err) if err.is_retryable() => {
                    warn!(endpoint = %endpoint, error = %err, "Key layout lookup failed, trying next endpoint");
                    last_error = Some(err);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(match last_error {
            Some(err) => err.into(),
            None => Error::Config("No endpoint available for key layout discovery".into()),
        })
    }
}

/// Routes records to per-range clients.
///
/// Not shared between tasks: the range map is owned through `&mut self`.
pub struct WriteRouter {
    keys: RowKeyBuilder,
    ring: Arc<dyn RingLookup>,
    ctx: ClientContext,
    queue_capacity: Option<usize>,
    progress: Arc<dyn Progress>,
    /// Clients in creation order
    clients: Vec<RangeClient>,
    index: HashMap<PartitionRange, usize>,
    /// Outcome of `close`, once called
    closed: Option<std::result::Result<(), CloseError>>,
}

impl WriteRouter {
    /// Route one record.
    ///
    /// Fails only for malformed keys or a ring that cannot place the key.
    /// Failures of the owning shard are reported by [`WriteRouter::close`].
    pub async fn write(&mut self, keys: &HashMap<String, Bytes>, values: Vec<Bytes>) -> Result<()> {
        if self.closed.is_some() {
            return Err(Error::Closed);
        }

        let row_key = self.keys.build(keys)?;
        let range = self.ring.range_for(&row_key)?;

        let slot = match self.index.entry(range) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let endpoints = self.ring.endpoints(entry.key())?;
                if endpoints.is_empty() {
                    return Err(Error::Ring(format!(
                        "Range {} has no endpoints",
                        entry.key()
                    )));
                }

                info!(
                    range = %entry.key(),
                    endpoints = ?endpoints,
                    "Creating range client"
                );
                let client = RangeClient::start(
                    entry.key().clone(),
                    endpoints,
                    self.ctx.clone(),
                    self.queue_capacity,
                );
                self.clients.push(client);
                *entry.insert(self.clients.len() - 1)
            }
        };

        let client = &self.clients[slot];
        if !client.enqueue(PendingWrite::new(row_key, values)).await {
            debug!(range = %client.range(), "Range client terminated, write dropped");
            self.ctx.metrics.record_dropped();
        }

        self.ctx.metrics.record_accepted();
        self.progress.progress();
        Ok(())
    }

    /// Stop every range client, wait for them to drain, and report the first
    /// failure.
    ///
    /// Calling it again returns the same outcome.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(outcome) = &self.closed {
            return outcome.clone().map_err(Error::from);
        }

        info!(shards = self.clients.len(), "Closing write router");
        let mut coordinator = ShutdownCoordinator::new();
        coordinator.stop_all(self.clients.iter_mut()).await;
        self.ctx.health.router_closed();

        let outcome = coordinator.finish();
        match &outcome {
            Ok(()) => info!(
                accepted = self.ctx.metrics.writes_accepted(),
                executed = self.ctx.metrics.executes_total(),
                "Write router closed"
            ),
            Err(err) => warn!(
                failed = err.failed,
                total = err.total,
                error = %err.first,
                "Write router closed with failures"
            ),
        }

        self.closed = Some(outcome.clone());
        outcome.map_err(Error::from)
    }

    /// Client serving `range`, if one was created.
    pub fn client(&self, range: &PartitionRange) -> Option<&RangeClient> {
        self.index.get(range).map(|&slot| &self.clients[slot])
    }

    /// All clients in creation order.
    pub fn clients(&self) -> impl Iterator<Item = &RangeClient> {
        self.clients.iter()
    }

    /// Number of range clients created so far.
    pub fn shard_count(&self) -> usize {
        self.clients.len()
    }

    pub fn key_builder(&self) -> &RowKeyBuilder {
        &self.keys
    }

    pub fn statements(&self) -> &Arc<PreparedStatementCache> {
        &self.ctx.statements
    }

    pub fn metrics(&self) -> &Arc<WriterMetrics> {
        &self.ctx.metrics
    }

    pub fn health(&self) -> &Arc<HealthCheck> {
        &self.ctx.health
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }
}

impl std::fmt::Debug for WriteRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteRouter")
            .field("shards", &self.clients.len())
            .field("closed", &self.closed.is_some())
            .finish()
    }
}
