//! Workflow definitions and the typed registry that dispatches them.
//!
//! A workflow body is an async function over a [`WorkflowContext`]: a
//! deterministic sequence of activity calls, signal/timer waits, child
//! spawns, and branches on prior results. Determinism is the contract: the
//! body must make the same calls in the same order on every execution, so
//! that replaying persisted history lines up with the code.
//!
//! Dispatch is an explicit, statically-typed mapping from workflow-type
//! identifier to implementation, resolved at startup. There is no global
//! mutable registry and no stringly-typed lookup at call sites.

use super::context::WorkflowContext;
use super::error::{ExecutionError, Result};
use crate::core::{deserialize_value, serialize_value};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A workflow type: typed input, typed output, deterministic body.
///
/// # Example
///
/// ```ignore
/// struct GreetWorkflow;
///
/// #[async_trait]
/// impl Workflow for GreetWorkflow {
///     type Input = String;
///     type Output = String;
///     const TYPE: &'static str = "greet";
///
///     async fn run(&self, ctx: &WorkflowContext, name: String) -> Result<String> {
///         let greeting = ctx.execute(&ComposeGreeting, name).await?;
///         Ok(greeting)
///     }
/// }
/// ```
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    type Input: Serialize + DeserializeOwned + Send + Sync;
    type Output: Serialize + DeserializeOwned + Send + Sync;

    /// Stable workflow-type identifier, recorded on every instance. Must not
    /// change across deployments while instances are in flight.
    const TYPE: &'static str;

    async fn run(&self, ctx: &WorkflowContext, input: Self::Input) -> Result<Self::Output>;
}

/// Object-safe adapter over a [`Workflow`], working in serialized payloads.
/// The typed edges stay inside: input is deserialized here, output
/// serialized here, both type-checked against the workflow's declared
/// shapes.
#[async_trait]
pub(super) trait WorkflowHandler: Send + Sync {
    fn workflow_type(&self) -> &'static str;

    async fn run(&self, ctx: &WorkflowContext, input: &[u8]) -> Result<Vec<u8>>;
}

struct TypedHandler<W: Workflow> {
    workflow: Arc<W>,
}

#[async_trait]
impl<W: Workflow> WorkflowHandler for TypedHandler<W> {
    fn workflow_type(&self) -> &'static str {
        W::TYPE
    }

    async fn run(&self, ctx: &WorkflowContext, input: &[u8]) -> Result<Vec<u8>> {
        let input: W::Input = deserialize_value(input)?;
        let output = self.workflow.run(ctx, input).await?;
        Ok(serialize_value(&output)?)
    }
}

/// The startup-resolved mapping from workflow type to implementation.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    handlers: HashMap<&'static str, Arc<dyn WorkflowHandler>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow implementation under its `TYPE`. Builder-style so
    /// the full registry reads as one declaration at startup.
    ///
    /// Registering the same type twice keeps the last registration; that is
    /// a configuration mistake, so it is logged loudly.
    pub fn register<W: Workflow>(mut self, workflow: W) -> Self {
        if self.handlers.contains_key(W::TYPE) {
            tracing::warn!(workflow_type = W::TYPE, "workflow type registered twice");
        }
        self.handlers.insert(
            W::TYPE,
            Arc::new(TypedHandler {
                workflow: Arc::new(workflow),
            }),
        );
        self
    }

    pub(super) fn get(&self, workflow_type: &str) -> Result<Arc<dyn WorkflowHandler>> {
        self.handlers
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownWorkflowType(workflow_type.to_string()))
    }

    /// Workflow types known to this registry.
    pub fn types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}
