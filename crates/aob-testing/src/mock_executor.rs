//! A configurable mock `Task`/`Agent` node behavior for testing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use aob_core::{Node, NodeExecutionError, NodeExecutor};

/// Handler function type for a mock node's execution.
pub type MockHandler = Arc<dyn Fn(&Node, &Value) -> Result<Value, NodeExecutionError> + Send + Sync>;

/// A configurable mock [`NodeExecutor`], for testing the engine's
/// scheduling and retry behavior without a real tool/model backend.
///
/// # Example
///
/// ```rust
/// use aob_testing::MockNodeExecutor;
/// use serde_json::json;
///
/// let executor = MockNodeExecutor::new().with_response(json!({ "ok": true }));
/// ```
#[derive(Clone)]
pub struct MockNodeExecutor {
    handler: Option<MockHandler>,
    fixed_response: Value,
    call_history: Arc<Mutex<Vec<Value>>>,
    fail_next_transient: Arc<Mutex<bool>>,
    fail_next_permanent: Arc<Mutex<bool>>,
}

impl std::fmt::Debug for MockNodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNodeExecutor")
            .field("call_count", &self.call_count())
            .finish()
    }
}

impl Default for MockNodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNodeExecutor {
    /// Creates a mock that echoes `{"echo": input}` on every call.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handler: None,
            fixed_response: Value::Null,
            call_history: Arc::new(Mutex::new(Vec::new())),
            fail_next_transient: Arc::new(Mutex::new(false)),
            fail_next_permanent: Arc::new(Mutex::new(false)),
        }
    }

    /// Sets a fixed response returned on every call (unless a handler is
    /// set, or a failure is queued).
    #[must_use]
    pub fn with_response(mut self, response: Value) -> Self {
        self.fixed_response = response;
        self
    }

    /// Sets a handler invoked on every call instead of returning the fixed
    /// response.
    #[must_use]
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Node, &Value) -> Result<Value, NodeExecutionError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Queues a transient failure for the next call only (exercises retry
    /// policy). Clears after the next call consumes it.
    pub fn fail_next_transient(&self, reason: impl Into<String>) {
        let _ = reason.into();
        *self.fail_next_transient.lock().unwrap() = true;
    }

    /// Queues a permanent failure for the next call only.
    pub fn fail_next_permanent(&self) {
        *self.fail_next_permanent.lock().unwrap() = true;
    }

    /// Number of times this executor has been invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_history.lock().unwrap().len()
    }

    /// The projected inputs this executor has observed, in call order.
    #[must_use]
    pub fn inputs(&self) -> Vec<Value> {
        self.call_history.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeExecutor for MockNodeExecutor {
    async fn execute(&self, node: &Node, input: Value) -> Result<Value, NodeExecutionError> {
        self.call_history.lock().unwrap().push(input.clone());

        if std::mem::take(&mut *self.fail_next_transient.lock().unwrap()) {
            return Err(NodeExecutionError::Transient("mock transient failure".to_string()));
        }
        if std::mem::take(&mut *self.fail_next_permanent.lock().unwrap()) {
            return Err(NodeExecutionError::Permanent("mock permanent failure".to_string()));
        }

        match &self.handler {
            Some(handler) => handler(node, &input),
            None => Ok(if self.fixed_response.is_null() {
                serde_json::json!({ "echo": input })
            } else {
                self.fixed_response.clone()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aob_core::model::{NodeKind, RetryPolicy};
    use std::time::Duration;

    fn sample_node() -> Node {
        Node {
            id: "a".to_string(),
            kind: NodeKind::Task,
            name: "a".to_string(),
            expr: "bag".to_string(),
            retry: RetryPolicy::default(),
            approval_key: None,
            attempt_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn default_executor_echoes_input() {
        let executor = MockNodeExecutor::new();
        let output = executor.execute(&sample_node(), serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(output, serde_json::json!({"echo": {"x": 1}}));
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn queued_transient_failure_fires_once() {
        let executor = MockNodeExecutor::new();
        executor.fail_next_transient("boom");
        let first = executor.execute(&sample_node(), serde_json::json!({})).await;
        assert!(matches!(first, Err(NodeExecutionError::Transient(_))));
        let second = executor.execute(&sample_node(), serde_json::json!({})).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn handler_overrides_fixed_response() {
        let executor = MockNodeExecutor::new().with_handler(|_node, input| {
            Ok(serde_json::json!({ "doubled": input.get("x").and_then(Value::as_i64).unwrap_or(0) * 2 }))
        });
        let output = executor.execute(&sample_node(), serde_json::json!({"x": 21})).await.unwrap();
        assert_eq!(output, serde_json::json!({"doubled": 42}));
    }
}
