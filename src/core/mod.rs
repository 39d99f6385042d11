//! Core types for the telos orchestration engine.
//!
//! This module provides the fundamental building blocks for durable
//! workflow execution:
//!
//! # Domain Model
//! - [`HistoryEvent`] / [`EventKind`]: the immutable, ordered, append-only
//!   records everything else is derived from
//! - [`WorkflowInstance`]: a snapshot reconstructed by folding events
//! - [`WorkflowStatus`]: the instance lifecycle state
//!
//! # Serialization
//! - [`serialize_value`] / [`deserialize_value`]: convert Rust types to bytes
//!   for storage
//! - [`hash_input`]: stable fingerprints of activity inputs for replay
//!   divergence detection
//!
//! # Retry Behavior
//! - [`RetryPolicy`]: attempt budget and backoff strategy
//! - [`RetryDecision`]: the evaluator's verdict for one failed attempt
//! - [`crate::executor::Retryable`]: per-error-type transient/permanent
//!   classification

mod error;
mod event;
mod instance;
pub mod retry;
mod serialization;

pub use error::{CoreError, Result};
pub use event::{ChildOutcome, EventKind, FailureKind, HistoryEvent};
pub use instance::{WorkflowInstance, WorkflowStatus};
pub use retry::{RetryDecision, RetryPolicy};
pub use serialization::{deserialize_value, hash_input, serialize_value};
