//! Ordered shutdown of range clients.

use super::range_client::RangeClient;
use crate::error::{CloseError, ShardError};
use tracing::{info, warn};

/// Stops range clients one by one and keeps the first failure.
///
/// Every client is stopped even after a failure; the aggregated error is
/// only produced by [`ShutdownCoordinator::finish`].
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    stopped: usize,
    failed: usize,
    first: Option<ShardError>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop one client, waiting for it to drain.
    pub async fn stop(&mut self, client: &mut RangeClient) {
        let result = client.close().await;
        self.stopped += 1;

        match result {
            Ok(()) => info!(
                range = %client.range(),
                stats = ?client.stats(),
                "Range client closed"
            ),
            Err(err) => {
                warn!(range = %client.range(), error = %err, "Range client closed with error");
                self.record(err);
            }
        }
    }

    /// Stop every client: signal all first so they drain in parallel, then
    /// wait for each in order.
    pub async fn stop_all<'a>(&mut self, clients: impl IntoIterator<Item = &'a mut RangeClient>) {
        let mut clients: Vec<&mut RangeClient> = clients.into_iter().collect();
        for client in clients.iter_mut() {
            client.request_stop();
        }
        for client in clients {
            self.stop(client).await;
        }
    }

    fn record(&mut self, err: ShardError) {
        self.failed += 1;
        if self.first.is_none() {
            self.first = Some(err);
        }
    }

    /// Number of clients stopped so far.
    pub fn stopped(&self) -> usize {
        self.stopped
    }

    /// Number of clients that reported a failure.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// The first failure, if any, with the failure count.
    pub fn finish(self) -> Result<(), CloseError> {
        match self.first {
            Some(first) => Err(CloseError {
                first,
                failed: self.failed,
                total: self.stopped,
            }),
            None => Ok(()),
        }
    }
}
