//! Common utilities and types shared across Offsync crates.
//!
//! This module provides the error taxonomy and the small value types
//! (task ids, priorities, strategies) used by the queue and the sync engine.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ConflictStrategy, HttpMethod, TaskId, TaskPriority, TaskType};
