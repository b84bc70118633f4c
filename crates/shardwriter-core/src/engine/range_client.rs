//! Per-shard client with ordered failover and opportunistic batching.
//!
//! Each [`RangeClient`] owns one background worker. The worker pulls writes
//! from a FIFO queue, connects to the candidate endpoints in order, and keeps
//! executing already-queued writes on the same connection up to the batch
//! threshold. The candidate cursor only moves forward: once every candidate
//! has failed the client is terminated for the rest of the session.

use super::queue::{self, PendingWrite, WriteReceiver, WriteSender};
use crate::config::ConsistencyLevel;
use crate::error::{ShardError, TransportError};
use crate::health::HealthCheck;
use crate::metrics::WriterMetrics;
use crate::prepared::PreparedStatementCache;
use crate::ring::PartitionRange;
use crate::transport::{ActiveConnection, ConnectionFactory, Endpoint};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Collaborators shared by every range client of a router.
#[derive(Clone)]
pub struct ClientContext {
    pub factory: Arc<dyn ConnectionFactory>,
    pub statements: Arc<PreparedStatementCache>,
    pub consistency: ConsistencyLevel,
    /// Maximum executes per connection acquisition
    pub batch_threshold: usize,
    pub metrics: Arc<WriterMetrics>,
    pub health: Arc<HealthCheck>,
}

/// Connection state of a range client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// No connection held
    Idle,
    /// Connected to an endpoint
    Connected(Endpoint),
    /// Worker exited, either drained or failed
    Terminated,
}

/// Counters of one range client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeClientStats {
    /// Successful executes
    pub executed: u64,
    /// Connection acquisitions that executed at least one write
    pub runs: u64,
    /// Largest number of executes in one run
    pub max_run: u64,
    /// Moves to the next candidate endpoint
    pub failovers: u64,
    /// Connections opened
    pub connections: u64,
    /// Statement prepares issued
    pub prepares: u64,
}

/// State visible to both the handle and the worker.
struct Shared {
    state: RwLock<ClientState>,
    error: RwLock<Option<ShardError>>,
    executed: AtomicU64,
    runs: AtomicU64,
    max_run: AtomicU64,
    failovers: AtomicU64,
    connections: AtomicU64,
    prepares: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: RwLock::new(ClientState::Idle),
            error: RwLock::new(None),
            executed: AtomicU64::new(0),
            runs: AtomicU64::new(0),
            max_run: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            connections: AtomicU64::new(0),
            prepares: AtomicU64::new(0),
        }
    }

    fn set_state(&self, state: ClientState) {
        *self.state.write() = state;
    }

    /// Keep the first failure only.
    fn fail(&self, err: ShardError) {
        let mut slot = self.error.write();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn stats(&self) -> RangeClientStats {
        RangeClientStats {
            executed: self.executed.load(Ordering::Relaxed),
            runs: self.runs.load(Ordering::Relaxed),
            max_run: self.max_run.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            prepares: self.prepares.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the worker serving one partition range.
pub struct RangeClient {
    range: PartitionRange,
    endpoints: Vec<Endpoint>,
    sender: Option<WriteSender>,
    handle: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
    metrics: Arc<WriterMetrics>,
    health: Arc<HealthCheck>,
}

impl RangeClient {
    /// Create the client and spawn its worker on the current tokio runtime.
    pub fn start(
        range: PartitionRange,
        endpoints: Vec<Endpoint>,
        ctx: ClientContext,
        queue_capacity: Option<usize>,
    ) -> Self {
        let (sender, receiver) = queue::channel(queue_capacity);
        let shared = Arc::new(Shared::new());

        ctx.health.register_shard(&range);
        ctx.metrics.record_shard_started();

        let metrics = ctx.metrics.clone();
        let health = ctx.health.clone();
        let worker = Worker {
            range: range.clone(),
            endpoints: endpoints.clone(),
            cursor: 0,
            connection: None,
            last_failure: None,
            receiver,
            shared: shared.clone(),
            ctx,
        };
        let handle = tokio::spawn(worker.run());

        Self {
            range,
            endpoints,
            sender: Some(sender),
            handle: Some(handle),
            shared,
            metrics,
            health,
        }
    }

    /// Range served by this client.
    pub fn range(&self) -> &PartitionRange {
        &self.range
    }

    /// Candidate endpoints in failover order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Queue a write.
    ///
    /// Returns `false` when the worker no longer accepts writes (terminated or
    /// stopping); the write is discarded.
    pub async fn enqueue(&self, write: PendingWrite) -> bool {
        match &self.sender {
            Some(sender) => sender.send(write).await.is_ok(),
            None => false,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ClientState {
        self.shared.state.read().clone()
    }

    /// Snapshot of the client's counters.
    pub fn stats(&self) -> RangeClientStats {
        self.shared.stats()
    }

    /// Fatal error of the worker, if it failed.
    pub fn last_error(&self) -> Option<ShardError> {
        self.shared.error.read().clone()
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state(), ClientState::Terminated)
    }

    /// Ask the worker to stop once its queue is drained. Does not wait.
    pub fn request_stop(&mut self) {
        if self.sender.take().is_some() {
            debug!(range = %self.range, "Stop requested");
        }
    }

    /// Stop the worker, wait for it to drain, and report its fatal error.
    ///
    /// Safe to call more than once; later calls report the same outcome.
    pub async fn close(&mut self) -> Result<(), ShardError> {
        self.request_stop();

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                error!(range = %self.range, error = %err, "Range client worker aborted");
                self.shared.fail(ShardError::Aborted {
                    range: self.range.clone(),
                    message: err.to_string(),
                });
                self.shared.set_state(ClientState::Terminated);
                self.metrics.record_shard_stopped(true);
                self.health.mark_failed(&self.range, &err.to_string());
            }
        }

        match self.last_error() {
            Some(err) => Err(err),
            None => {
                self.health.mark_closed(&self.range);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for RangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeClient")
            .field("range", &self.range)
            .field("endpoints", &self.endpoints)
            .field("state", &self.state())
            .finish()
    }
}

/// A failed attempt: the write to retry, where it failed, and why.
struct FailedWrite {
    write: PendingWrite,
    endpoint: Endpoint,
    error: TransportError,
}

/// Background half of a range client.
struct Worker {
    range: PartitionRange,
    endpoints: Vec<Endpoint>,
    /// Next candidate to connect to
    cursor: usize,
    connection: Option<ActiveConnection>,
    last_failure: Option<TransportError>,
    receiver: WriteReceiver,
    shared: Arc<Shared>,
    ctx: ClientContext,
}

impl Worker {
    async fn run(mut self) {
        info!(
            range = %self.range,
            candidates = self.endpoints.len(),
            "Range client started"
        );

        let result = self.process().await;
        self.disconnect().await;

        match result {
            Ok(()) => {
                info!(range = %self.range, stats = ?self.shared.stats(), "Range client drained");
                self.ctx.metrics.record_shard_stopped(false);
            }
            Err(err) => {
                self.receiver.close();
                // the write that failed is lost together with the queued ones
                let mut abandoned = 1u64;
                while self.receiver.try_recv().is_some() {
                    abandoned += 1;
                }

                error!(
                    range = %self.range,
                    error = %err,
                    abandoned,
                    "Range client failed"
                );
                self.ctx.metrics.record_abandoned(abandoned);
                self.ctx.metrics.record_shard_stopped(true);
                self.ctx.health.mark_failed(&self.range, &err.to_string());
                self.shared.fail(err);
            }
        }

        self.shared.set_state(ClientState::Terminated);
    }

    /// Serve writes until the queue ends or the client fails.
    async fn process(&mut self) -> Result<(), ShardError> {
        while let Some(first) = self.receiver.recv().await {
            let mut next = Some(first);

            while let Some(write) = next.take() {
                let connection = match self.connection.take() {
                    Some(connection) => connection,
                    None => self.connect_next().await?,
                };

                if let Err(failed) = self.execute_run(connection, write).await {
                    self.classify(&failed.endpoint, failed.error)?;
                    next = Some(failed.write);
                }
            }
        }

        Ok(())
    }

    /// Connect to the next candidate, skipping those that fail transiently.
    async fn connect_next(&mut self) -> Result<ActiveConnection, ShardError> {
        while self.cursor < self.endpoints.len() {
            let endpoint = self.endpoints[self.cursor].clone();
            self.cursor += 1;

            match ActiveConnection::open(self.ctx.factory.as_ref(), &endpoint).await {
                Ok(connection) => {
                    info!(
                        range = %self.range,
                        endpoint = %endpoint,
                        connection_id = connection.id().as_u64(),
                        "Range client connected"
                    );
                    self.shared.connections.fetch_add(1, Ordering::Relaxed);
                    self.ctx.metrics.record_connection();
                    self.ctx.health.mark_connected(&self.range, &endpoint);
                    self.shared.set_state(ClientState::Connected(endpoint));
                    return Ok(connection);
                }
                Err(err) => self.classify(&endpoint, err)?,
            }
        }

        Err(ShardError::Exhausted {
            range: self.range.clone(),
            attempted: self.endpoints.len(),
            source: self
                .last_failure
                .take()
                .unwrap_or_else(|| TransportError::transient("no candidate endpoints")),
        })
    }

    /// Execute `first`, then keep draining queued writes on the same
    /// connection up to the batch threshold.
    ///
    /// On failure the connection is closed and the unexecuted write returned.
    async fn execute_run(
        &mut self,
        mut connection: ActiveConnection,
        first: PendingWrite,
    ) -> Result<(), FailedWrite> {
        match self.run_on(&mut connection, first).await {
            Ok(()) => {
                self.connection = Some(connection);
                Ok(())
            }
            Err((write, error)) => {
                let endpoint = connection.endpoint().clone();
                self.close_connection(connection).await;
                Err(FailedWrite {
                    write,
                    endpoint,
                    error,
                })
            }
        }
    }

    async fn run_on(
        &mut self,
        connection: &mut ActiveConnection,
        first: PendingWrite,
    ) -> Result<(), (PendingWrite, TransportError)> {
        let fresh = self.ctx.statements.get(connection.id()).is_none();
        let statement = match self.ctx.statements.get_or_prepare(connection).await {
            Ok(statement) => statement,
            Err(err) => return Err((first, err)),
        };
        if fresh {
            self.shared.prepares.fetch_add(1, Ordering::Relaxed);
        }

        let mut executed = 0usize;
        let mut write = first;
        loop {
            if let Err(err) = connection
                .execute(statement, &write.values, self.ctx.consistency)
                .await
            {
                self.finish_run(executed);
                return Err((write, err));
            }

            executed += 1;
            self.shared.executed.fetch_add(1, Ordering::Relaxed);
            self.ctx.metrics.record_execute();

            if executed >= self.ctx.batch_threshold {
                break;
            }
            match self.receiver.try_recv() {
                Some(queued) => write = queued,
                None => break,
            }
        }

        self.finish_run(executed);
        Ok(())
    }

    fn finish_run(&self, executed: usize) {
        if executed == 0 {
            return;
        }
        self.shared.runs.fetch_add(1, Ordering::Relaxed);
        self.shared
            .max_run
            .fetch_max(executed as u64, Ordering::Relaxed);
        self.ctx.metrics.record_run(executed);
        debug!(range = %self.range, executed, "Run finished");
    }

    /// Decide whether a failure at `endpoint` allows trying the next candidate.
    fn classify(&mut self, endpoint: &Endpoint, err: TransportError) -> Result<(), ShardError> {
        self.ctx.metrics.record_error(err.kind);

        if !err.is_retryable() {
            return Err(ShardError::Rejected {
                range: self.range.clone(),
                endpoint: endpoint.clone(),
                source: err,
            });
        }

        let remaining = self.endpoints.len() - self.cursor;
        warn!(
            range = %self.range,
            endpoint = %endpoint,
            error = %err,
            remaining,
            "Candidate endpoint failed"
        );
        if remaining > 0 {
            self.shared.failovers.fetch_add(1, Ordering::Relaxed);
            self.ctx.metrics.record_failover();
            self.ctx
                .health
                .mark_failover(&self.range, endpoint, &err.message);
        }
        self.last_failure = Some(err);
        Ok(())
    }

    async fn close_connection(&mut self, connection: ActiveConnection) {
        self.ctx.statements.evict(connection.id());
        connection.close().await;
        self.shared.set_state(ClientState::Idle);
    }

    async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.close_connection(connection).await;
        }
    }
}
