mod backoff;
mod host_worker;
mod line_buffer;
mod pool;
mod registry;

pub use backoff::{Backoff, BackoffPolicy};
pub use pool::WorkerPool;
pub use registry::{SessionId, SessionRegistry};
