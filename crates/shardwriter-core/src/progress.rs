//! Progress reporting hook.

/// Liveness signal invoked once per accepted write.
///
/// Implementations must be cheap; the router calls this on the caller's
/// thread.
pub trait Progress: Send + Sync {
    fn progress(&self);
}

impl<F> Progress for F
where
    F: Fn() + Send + Sync,
{
    fn progress(&self) {
        self()
    }
}

/// Progress sink that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn progress(&self) {}
}
