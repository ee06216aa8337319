//! Offsync Sync Engine
//!
//! Background synchronization of queued tasks, including:
//! - Periodic, on-demand and reconnect-triggered sync cycles
//! - Bounded concurrent execution with per-task timeouts
//! - Retry strategy with exponential backoff
//! - Conflict detection and pluggable resolution strategies
//! - Status, statistics and change events

pub mod config;
pub mod conflict;
pub mod engine;
pub mod events;
pub mod executor;
pub mod http;
pub mod network;
pub mod retry;
pub mod scheduler;
pub mod state;

// Re-export main types
pub use config::{SyncConfig, SyncConfigUpdate};
pub use conflict::{
    extract_timestamp, resolve_with, ConflictConfigUpdate, ConflictResolutionConfig,
    ConflictResolutionResult, ConflictResolver, CustomResolver,
};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use events::{EventBus, SyncEvent};
pub use executor::{ExecutorRegistry, FnExecutor, TaskExecutor};
pub use http::HttpExecutor;
pub use network::NetworkMonitor;
pub use retry::RetryConfig;
pub use scheduler::{CycleReport, SchedulerCommand, SyncScheduler, SyncSchedulerHandle, SyncTrigger};
pub use state::{StatsTracker, SyncStats, SyncStatus};

pub use offsync_common::{ConflictStrategy, Error, HttpMethod, Result, TaskId, TaskPriority, TaskType};
pub use offsync_queue::{
    JsonFilePersistence, MemoryPersistence, NewTask, SyncTask, TaskPersistence, TaskState,
};
