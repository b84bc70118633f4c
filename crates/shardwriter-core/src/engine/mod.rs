//! Write distribution engine.
//!
//! [`WriteRouter`] maps records to [`RangeClient`]s; each client runs one
//! background worker; [`ShutdownCoordinator`] drains them at close.

mod queue;
mod range_client;
mod router;
mod shutdown;

pub use queue::PendingWrite;
pub use range_client::{ClientContext, ClientState, RangeClient, RangeClientStats};
pub use router::{WriteRouter, WriteRouterBuilder};
pub use shutdown::ShutdownCoordinator;
