//! Graph compiler: parses a declarative [`WorkflowSpec`], validates it,
//! and lowers it into a runtime [`Graph`] with precomputed adjacency
//! indexes.
//!
//! Compilation is pure and side-effect-free — the same spec always yields a
//! byte-identical internal graph, so `compile` takes `&WorkflowSpec` by
//! reference and never touches the filesystem or network.

use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::model::{Node, NodeId, NodeKind, WorkflowSpec};

/// Errors `compile` can report, each carrying enough detail to locate the
/// offending spec fragment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CompileError {
    /// An edge references a node id that doesn't exist in `nodes`.
    #[error("edge references unknown node: {0}")]
    UnknownNodeReference(NodeId),

    /// Two nodes share the same id.
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(NodeId),

    /// A cycle was found; `path` is the cycle starting at the first
    /// back-edge discovered by depth-first search.
    #[error("cycle detected: {}", path.join(" -> "))]
    CycleDetected {
        /// The cycle, as a sequence of node ids.
        path: Vec<NodeId>,
    },

    /// The spec contained no nodes.
    #[error("graph has no nodes")]
    EmptyGraph,

    /// A `Human` node had no `approval_key`.
    #[error("human node {node_id} is missing an approval_key")]
    MissingApprovalKey {
        /// Offending node id.
        node_id: NodeId,
    },

    /// A node's retry policy violated `1 <= max_attempts <= 16` or
    /// `base_delay <= max_delay`.
    #[error("node {node_id} has an invalid retry policy field: {field}")]
    InvalidRetryPolicy {
        /// Offending node id.
        node_id: NodeId,
        /// Name of the invalid field.
        field: String,
    },

    /// No node had in-degree 0 among kind != Terminal.
    #[error("graph has no start node")]
    NoStartNode,

    /// More than one node had in-degree 0 among kind != Terminal.
    #[error("graph has multiple start nodes: {}", candidates.join(", "))]
    MultipleStartNodes {
        /// The candidate start node ids found.
        candidates: Vec<NodeId>,
    },
}

/// A validated, compiled workflow graph with precomputed adjacency.
///
/// Forward/reverse adjacency give O(1) predecessor/successor lookup; the
/// transitive predecessor set per node is used by the engine's AND-join
/// fan-in semantics.
#[derive(Debug, Clone)]
pub struct Graph {
    spec_id: String,
    nodes: HashMap<NodeId, Node>,
    /// Insertion order of node ids, preserved for deterministic tiebreaks.
    node_order: Vec<NodeId>,
    forward: HashMap<NodeId, Vec<NodeId>>,
    reverse: HashMap<NodeId, Vec<NodeId>>,
    edges_by_pair: HashMap<(NodeId, NodeId), crate::model::Edge>,
    transitive_predecessors: HashMap<NodeId, HashSet<NodeId>>,
    start_node: NodeId,
}

impl Graph {
    /// The spec id this graph was compiled from.
    #[must_use]
    pub fn spec_id(&self) -> &str {
        &self.spec_id
    }

    /// The designated start node.
    #[must_use]
    pub fn start_node(&self) -> &str {
        &self.start_node
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All node ids in spec order.
    #[must_use]
    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_order
    }

    /// Successors of a node, in the order their edges appear in the spec.
    #[must_use]
    pub fn successors(&self, id: &str) -> &[NodeId] {
        self.forward.get(id).map_or(&[], Vec::as_slice)
    }

    /// Predecessors of a node.
    #[must_use]
    pub fn predecessors(&self, id: &str) -> &[NodeId] {
        self.reverse.get(id).map_or(&[], Vec::as_slice)
    }

    /// The edge from `from` to `to`, if present.
    #[must_use]
    pub fn edge(&self, from: &str, to: &str) -> Option<&crate::model::Edge> {
        self.edges_by_pair
            .get(&(from.to_string(), to.to_string()))
    }

    /// All edges incoming to `id`.
    #[must_use]
    pub fn incoming_edges(&self, id: &str) -> Vec<&crate::model::Edge> {
        self.predecessors(id)
            .iter()
            .filter_map(|p| self.edge(p, id))
            .collect()
    }

    /// Whether every transitive predecessor of `id` is contained in
    /// `completed` — the AND-join test used by step 4 of the engine loop.
    #[must_use]
    pub fn predecessors_satisfied(&self, id: &str, completed: &HashSet<NodeId>) -> bool {
        self.transitive_predecessors
            .get(id)
            .is_none_or(|preds| preds.is_subset(completed))
    }

    /// Direct predecessors satisfied (used for non-join fast path; equal to
    /// the transitive check when in-degree <= 1).
    #[must_use]
    pub fn direct_predecessors_satisfied(&self, id: &str, completed: &HashSet<NodeId>) -> bool {
        self.predecessors(id).iter().all(|p| completed.contains(p))
    }
}

/// Compiles a declarative spec into a validated runtime [`Graph`].
pub fn compile(spec: &WorkflowSpec) -> Result<Graph, CompileError> {
    if spec.nodes.is_empty() {
        return Err(CompileError::EmptyGraph);
    }

    let mut nodes = HashMap::new();
    for node in &spec.nodes {
        if nodes.insert(node.id.clone(), node.clone()).is_some() {
            return Err(CompileError::DuplicateNodeId(node.id.clone()));
        }
    }

    for node in spec.nodes.iter() {
        if node.kind == NodeKind::Human {
            match &node.approval_key {
                Some(key) if !key.is_empty() => {}
                _ => {
                    return Err(CompileError::MissingApprovalKey {
                        node_id: node.id.clone(),
                    })
                }
            }
        }
        validate_retry_policy(node)?;
    }

    let mut forward: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut reverse: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut edges_by_pair = HashMap::new();

    for edge in &spec.edges {
        if !nodes.contains_key(&edge.from) {
            return Err(CompileError::UnknownNodeReference(edge.from.clone()));
        }
        if !nodes.contains_key(&edge.to) {
            return Err(CompileError::UnknownNodeReference(edge.to.clone()));
        }
        forward.entry(edge.from.clone()).or_default().push(edge.to.clone());
        reverse.entry(edge.to.clone()).or_default().push(edge.from.clone());
        edges_by_pair.insert((edge.from.clone(), edge.to.clone()), edge.clone());
    }

    // petgraph gives a cheap yes/no cycle check over the whole graph; when it
    // says yes we fall back to a DFS that can name the actual cycle path.
    let mut petgraph_index = DiGraph::<NodeId, ()>::new();
    let mut index_of: HashMap<NodeId, NodeIndex> = HashMap::new();
    for node in &spec.nodes {
        index_of.insert(node.id.clone(), petgraph_index.add_node(node.id.clone()));
    }
    for edge in &spec.edges {
        petgraph_index.add_edge(index_of[&edge.from], index_of[&edge.to], ());
    }
    if is_cyclic_directed(&petgraph_index) {
        detect_cycles(&spec.nodes, &forward)?;
        return Err(CompileError::CycleDetected { path: Vec::new() });
    }

    let node_order: Vec<NodeId> = spec.nodes.iter().map(|n| n.id.clone()).collect();

    let start_candidates: Vec<NodeId> = spec
        .nodes
        .iter()
        .filter(|n| n.kind != NodeKind::Terminal)
        .filter(|n| reverse.get(&n.id).map(Vec::len).unwrap_or(0) == 0)
        .map(|n| n.id.clone())
        .collect();

    let start_node = match start_candidates.len() {
        0 => return Err(CompileError::NoStartNode),
        1 => start_candidates[0].clone(),
        _ => {
            return Err(CompileError::MultipleStartNodes {
                candidates: start_candidates,
            })
        }
    };

    let transitive_predecessors = compute_transitive_predecessors(&node_order, &reverse);

    Ok(Graph {
        spec_id: spec.id.clone(),
        nodes,
        node_order,
        forward,
        reverse,
        edges_by_pair,
        transitive_predecessors,
        start_node,
    })
}

fn validate_retry_policy(node: &Node) -> Result<(), CompileError> {
    if node.kind == NodeKind::Human || node.kind == NodeKind::Terminal {
        return Ok(());
    }
    let policy = &node.retry;
    if policy.max_attempts < 1 || policy.max_attempts > 16 {
        return Err(CompileError::InvalidRetryPolicy {
            node_id: node.id.clone(),
            field: "max_attempts".to_string(),
        });
    }
    if policy.base_delay > policy.max_delay {
        return Err(CompileError::InvalidRetryPolicy {
            node_id: node.id.clone(),
            field: "base_delay".to_string(),
        });
    }
    Ok(())
}

/// Depth-first cycle detection; reports the first back-edge found, with its
/// full path from the DFS root.
fn detect_cycles(
    nodes: &[Node],
    forward: &HashMap<NodeId, Vec<NodeId>>,
) -> Result<(), CompileError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks: HashMap<NodeId, Mark> = nodes.iter().map(|n| (n.id.clone(), Mark::Unvisited)).collect();
    let mut stack: Vec<NodeId> = Vec::new();

    fn visit(
        id: &NodeId,
        forward: &HashMap<NodeId, Vec<NodeId>>,
        marks: &mut HashMap<NodeId, Mark>,
        stack: &mut Vec<NodeId>,
    ) -> Result<(), CompileError> {
        marks.insert(id.clone(), Mark::InProgress);
        stack.push(id.clone());

        if let Some(successors) = forward.get(id) {
            for next in successors {
                match marks.get(next).copied().unwrap_or(Mark::Unvisited) {
                    Mark::Unvisited => visit(next, forward, marks, stack)?,
                    Mark::InProgress => {
                        let start = stack.iter().position(|n| n == next).unwrap_or(0);
                        let mut path: Vec<NodeId> = stack[start..].to_vec();
                        path.push(next.clone());
                        return Err(CompileError::CycleDetected { path });
                    }
                    Mark::Done => {}
                }
            }
        }

        stack.pop();
        marks.insert(id.clone(), Mark::Done);
        Ok(())
    }

    for node in nodes {
        if marks.get(&node.id).copied() == Some(Mark::Unvisited) {
            visit(&node.id, forward, &mut marks, &mut stack)?;
        }
    }
    Ok(())
}

fn compute_transitive_predecessors(
    order: &[NodeId],
    reverse: &HashMap<NodeId, Vec<NodeId>>,
) -> HashMap<NodeId, HashSet<NodeId>> {
    let mut result: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();

    fn collect(
        id: &NodeId,
        reverse: &HashMap<NodeId, Vec<NodeId>>,
        memo: &mut HashMap<NodeId, HashSet<NodeId>>,
    ) -> HashSet<NodeId> {
        if let Some(cached) = memo.get(id) {
            return cached.clone();
        }
        let mut set = HashSet::new();
        if let Some(preds) = reverse.get(id) {
            for p in preds {
                set.insert(p.clone());
                let transitive = collect(p, reverse, memo);
                set.extend(transitive);
            }
        }
        memo.insert(id.clone(), set.clone());
        set
    }

    for id in order {
        let set = collect(id, reverse, &mut result);
        result.insert(id.clone(), set);
    }
    result
}
