//! Node execution seam: the engine never calls model/tool code directly —
//! `Task` and `Agent` node bodies are supplied by the caller through
//! [`NodeExecutor`] implementations registered in a [`NodeRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{Json, Node};

/// The outcome of one node execution attempt, distinguishing transient
/// failures (eligible for the node's retry policy) from permanent ones.
#[derive(Debug, Clone)]
pub enum NodeExecutionError {
    /// Worth retrying, subject to the node's `RetryPolicy`.
    Transient(String),
    /// Not worth retrying; the node (and, absent other ready work, the run)
    /// fails immediately.
    Permanent(String),
}

impl std::fmt::Display for NodeExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeExecutionError::Transient(reason) => write!(f, "transient: {reason}"),
            NodeExecutionError::Permanent(reason) => write!(f, "permanent: {reason}"),
        }
    }
}

/// The behavior bound to a `Task` or `Agent` node.
///
/// Implementations own whatever clients they need (model APIs, tool
/// gateways, deterministic pure functions) — the engine only ever sees the
/// projected input and the `Result<Json, NodeExecutionError>` outcome.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Executes one attempt of `node` given its projected input.
    async fn execute(&self, node: &Node, input: Json) -> Result<Json, NodeExecutionError>;
}

/// Maps node ids to the executor that services them. `Human` and `Terminal`
/// nodes never consult the registry; `Task`/`Agent` nodes without a
/// registered executor fail permanently at invocation time.
#[derive(Default, Clone)]
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `executor` to `node_id`, replacing any prior binding.
    #[must_use]
    pub fn with_executor(mut self, node_id: impl Into<String>, executor: Arc<dyn NodeExecutor>) -> Self {
        self.executors.insert(node_id.into(), executor);
        self
    }

    /// Looks up the executor bound to a node id.
    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_id).cloned()
    }
}

/// An executor backed by a closure, for tests and simple deterministic
/// `Task` nodes that don't need a full trait impl.
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F> NodeExecutor for FnExecutor<F>
where
    F: Fn(&Node, Json) -> Result<Json, NodeExecutionError> + Send + Sync,
{
    async fn execute(&self, node: &Node, input: Json) -> Result<Json, NodeExecutionError> {
        (self.0)(node, input)
    }
}

/// An executor that always fails transiently, used to exercise retry logic
/// in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysTransientExecutor;

#[async_trait]
impl NodeExecutor for AlwaysTransientExecutor {
    async fn execute(&self, _node: &Node, _input: Json) -> Result<Json, NodeExecutionError> {
        Err(NodeExecutionError::Transient("simulated transient failure".to_string()))
    }
}

/// An executor that always fails permanently.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPermanentExecutor;

#[async_trait]
impl NodeExecutor for AlwaysPermanentExecutor {
    async fn execute(&self, _node: &Node, _input: Json) -> Result<Json, NodeExecutionError> {
        Err(NodeExecutionError::Permanent("simulated permanent failure".to_string()))
    }
}

/// An executor that sleeps longer than any reasonable `attempt_timeout`,
/// used to exercise the engine's per-attempt timeout handling in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRespondingExecutor;

#[async_trait]
impl NodeExecutor for NeverRespondingExecutor {
    async fn execute(&self, _node: &Node, _input: Json) -> Result<Json, NodeExecutionError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(Json::Null)
    }
}
