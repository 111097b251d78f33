//! Task tracking: the registry and the per-operation context handed to
//! executors.

pub mod registry;
pub mod signal;

pub use registry::{Listener, SubscriptionId, TaskRegistry};
pub use signal::{AbortSignal, OperationContext, ProgressSink};
