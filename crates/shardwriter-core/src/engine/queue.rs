//! Per-shard work queue.

use crate::row_key::RowKey;
use bytes::Bytes;
use tokio::sync::mpsc;

/// A record queued on one range client.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    /// Partition key of the record
    pub row_key: RowKey,
    /// Values bound to the statement, in order
    pub values: Vec<Bytes>,
}

impl PendingWrite {
    pub fn new(row_key: RowKey, values: Vec<Bytes>) -> Self {
        Self { row_key, values }
    }
}

/// Producer half held by the range client handle.
///
/// Dropping it is the stop signal: the worker drains what is queued and
/// then sees the channel end.
pub(crate) enum WriteSender {
    Unbounded(mpsc::UnboundedSender<PendingWrite>),
    Bounded(mpsc::Sender<PendingWrite>),
}

/// Consumer half owned by the worker.
pub(crate) enum WriteReceiver {
    Unbounded(mpsc::UnboundedReceiver<PendingWrite>),
    Bounded(mpsc::Receiver<PendingWrite>),
}

/// Create a queue, bounded when `capacity` is set.
pub(crate) fn channel(capacity: Option<usize>) -> (WriteSender, WriteReceiver) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (WriteSender::Bounded(tx), WriteReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (WriteSender::Unbounded(tx), WriteReceiver::Unbounded(rx))
        }
    }
}

impl WriteSender {
    /// Queue a write, waiting for capacity on a bounded queue.
    ///
    /// Hands the write back when the worker no longer accepts work.
    pub async fn send(&self, write: PendingWrite) -> Result<(), PendingWrite> {
        match self {
            WriteSender::Unbounded(tx) => tx.send(write).map_err(|e| e.0),
            WriteSender::Bounded(tx) => tx.send(write).await.map_err(|e| e.0),
        }
    }
}

impl WriteReceiver {
    /// Wait for the next write; `None` once stopped and drained.
    pub async fn recv(&mut self) -> Option<PendingWrite> {
        match self {
            WriteReceiver::Unbounded(rx) => rx.recv().await,
            WriteReceiver::Bounded(rx) => rx.recv().await,
        }
    }

    /// Next already-queued write, without waiting.
    pub fn try_recv(&mut self) -> Option<PendingWrite> {
        match self {
            WriteReceiver::Unbounded(rx) => rx.try_recv().ok(),
            WriteReceiver::Bounded(rx) => rx.try_recv().ok(),
        }
    }

    /// Refuse further writes; already queued ones stay readable.
    pub fn close(&mut self) {
        match self {
            WriteReceiver::Unbounded(rx) => rx.close(),
            WriteReceiver::Bounded(rx) => rx.close(),
        }
    }
}
