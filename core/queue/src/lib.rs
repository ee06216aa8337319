//! Offsync task queue.
//!
//! Durable, ordered storage for pending sync tasks:
//! - Task model and lifecycle transitions
//! - Validation of new task specifications
//! - Pluggable persistence (JSON files, in-memory)
//! - Priority-ordered eligibility and atomic claiming

pub mod persistence;
pub mod store;
pub mod task;

pub use persistence::{JsonFilePersistence, MemoryPersistence, TaskPersistence};
pub use store::{TaskCounts, TaskStore};
pub use task::{FailureOutcome, NewTask, PendingConflict, SyncTask, TaskState};
