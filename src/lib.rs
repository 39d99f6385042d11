//! Telos: Durable Workflow Orchestration for Rust
//!
//! `telos` (τέλος, Greek for "end" or "goal") drives long-lived business
//! processes to completion: crash-safe, signal-driven workflows with
//! retryable side effects, durable timers, and escalation of unrecoverable
//! failures.
//!
//! # Features
//!
//! - **Durable execution**: every state change is an appended history event;
//!   replay reconstructs an instance after any crash
//! - **At-most-once side effects**: a completed activity is never re-run;
//!   attempts carry idempotency keys for the one crash window where
//!   re-invocation is forced
//! - **Retry with backoff**: per-activity policies, with permanent/business
//!   errors short-circuiting straight to escalation
//! - **Signals and deadlines**: a single "first of {signal, timer}" race
//!   primitive, durable on both sides
//! - **Child workflows**: spawn-and-await with deterministic identities
//! - **Payment adapters**: PayFast, Paystack, and Yoco integrations behind
//!   one normalized contract
//!
//! # Quick Start
//!
//! ```ignore
//! use telos::prelude::*;
//!
//! let storage: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
//! let deps = FilingDeps { /* collaborators */ };
//! let registry = WorkflowRegistry::new()
//!     .register(FilingWorkflow::new(&deps))
//!     .register(ComplianceCheckWorkflow::new(&deps));
//!
//! let engine = WorkflowEngine::new(storage, registry);
//! engine.recover().await?;
//!
//! let id = Uuid::new_v4();
//! engine.start::<FilingWorkflow>(id, request).await?;
//! engine.signal(id, "otp", serde_json::to_vec("123456")?).await?;
//! let snapshot = engine.wait_for_completion(id, Duration::from_secs(60)).await?;
//! ```
//!
//! # Module Organization
//!
//! Each module hides one set of decisions likely to change:
//!
//! - [`core`]: events, the instance fold, retry policy, serialization format
//! - [`storage`]: the history store, signal inbox, and deadline persistence
//! - [`executor`]: the execution engine and the replay protocol
//! - [`payment`]: provider adapters and webhook validation
//! - [`filing`]: the concrete filing process and its collaborator seams

pub mod core;
pub mod executor;
pub mod filing;
pub mod payment;
pub mod storage;

// Re-export commonly used types for convenience. Paths are crate-qualified
// because a root module named `core` shadows the builtin crate in use paths.
pub use crate::core::{
    deserialize_value, hash_input, serialize_value, ChildOutcome, CoreError, EventKind,
    FailureKind, HistoryEvent, RetryDecision, RetryPolicy, WorkflowInstance, WorkflowStatus,
};

pub use crate::executor::{
    Activity, ActivityContext, ActivityError, ActivityRunner, EngineConfig, ExecutionError,
    Retryable, SignalOutcome, StartOutcome, WaitOutcome, Workflow, WorkflowContext,
    WorkflowEngine, WorkflowRegistry,
};

pub use crate::payment::{
    PaymentError, PaymentProvider, PaymentRequest, PaymentResult, PaymentStatus, ProviderRegistry,
    WebhookValidation,
};

pub use crate::storage::{HistoryStore, InMemoryHistoryStore, SignalEnvelope, StorageError};

#[cfg(feature = "sqlite")]
pub use crate::storage::SqliteHistoryStore;

// Re-export dependencies used in public API so downstream crates do not
// fight version mismatches.
pub use serde;
pub use tokio;
pub use uuid;

/// Prelude module for convenient glob imports
///
/// # Example
///
/// ```ignore
/// use telos::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{
        EventKind, FailureKind, HistoryEvent, RetryDecision, RetryPolicy, WorkflowInstance,
        WorkflowStatus,
    };

    pub use crate::executor::{
        Activity, ActivityContext, ActivityError, EngineConfig, ExecutionError, Retryable,
        SignalOutcome, StartOutcome, WaitOutcome, Workflow, WorkflowContext, WorkflowEngine,
        WorkflowRegistry,
    };

    pub use crate::filing::{
        ComplianceCheckWorkflow, FilingDeps, FilingReceipt, FilingRequest, FilingWorkflow,
    };

    pub use crate::payment::{
        PaymentProvider, PaymentRequest, PaymentResult, PaymentStatus, ProviderRegistry,
        WebhookValidation,
    };

    pub use crate::storage::{HistoryStore, InMemoryHistoryStore};

    #[cfg(feature = "sqlite")]
    pub use crate::storage::SqliteHistoryStore;

    // Re-export commonly used external types
    pub use serde::{Deserialize, Serialize};
    pub use std::sync::Arc;
    pub use uuid::Uuid;
}
