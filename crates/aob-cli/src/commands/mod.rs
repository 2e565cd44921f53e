//! One module per control-plane operation: `compile`, `start`, `resume`,
//! `events`, `snapshot`, `replay`, `cancel`, and `dlq`.

pub mod cancel;
pub mod compile;
pub mod dlq;
pub mod events;
pub mod replay;
pub mod resume;
pub mod snapshot;
pub mod start;

use std::sync::Arc;

use aob_core::{AllowAllOracle, Engine, Graph, MemoryDecisionSink, NodeExecutionError, NodeRegistry};
use serde_json::json;

use crate::backend::FileBackend;

/// The concrete engine type every command operates on: the file-persisted
/// local backend serving as both `EventStore` and `DlqStore`, an
/// allow-everything oracle (there is no policy ingress in this CLI; wire a
/// real `PolicyOracle` adapter in a hosted deployment), and an in-memory
/// decision sink (a `ColumnarDecisionSink` belongs in a long-running
/// process, not a one-shot CLI invocation).
pub type CliEngine = Engine<FileBackend, aob_core::MemoryLeaseManager, AllowAllOracle, MemoryDecisionSink, FileBackend>;

/// Builds the engine shared by every subcommand, over the given backend.
#[must_use]
pub fn build_engine(backend: Arc<FileBackend>) -> CliEngine {
    Engine::new(
        backend.clone(),
        Arc::new(aob_core::MemoryLeaseManager::new()),
        Arc::new(AllowAllOracle),
        Arc::new(MemoryDecisionSink::new()),
        backend,
        aob_core::EngineConfig::default(),
    )
}

/// A `NodeRegistry` that echoes every `Task`/`Agent` node's projected input
/// back as its output. There is no tool/model gateway in this CLI (the core
/// only defines the `NodeExecutor` adapter seam); this is a deliberately
/// trivial default so a spec with no external dependencies can be driven
/// end to end locally. A hosted deployment registers real executors
/// per node instead of calling `default_registry`.
#[must_use]
pub fn default_registry(graph: &Graph) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    for node_id in graph.node_ids() {
        if let Some(node) = graph.node(node_id) {
            if matches!(node.kind, aob_core::NodeKind::Task | aob_core::NodeKind::Agent) {
                registry = registry.with_executor(
                    node_id.clone(),
                    Arc::new(aob_core::engine::executor::FnExecutor(
                        |_node, input| -> Result<serde_json::Value, NodeExecutionError> { Ok(json!({ "echo": input })) },
                    )),
                );
            }
        }
    }
    registry
}
