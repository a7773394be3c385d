mod keyed_lock;
mod orchestrator;

pub use keyed_lock::{KeyedLockGuard, KeyedLocks};
pub use orchestrator::{JobOrchestrator, JobQueue, RatingJob, WorkerHandle};
