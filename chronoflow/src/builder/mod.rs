//! The graph builder: sizing pass, in-place construction, edge wiring.
//!
//! Building is two-phase, like the descriptor says: a sizing pass sums every
//! node builder's `memory_size()` so the arena is allocated once, then nodes
//! and their endpoint trees are constructed in place in index order, and
//! finally edges are wired by path-walking outputs into inputs. The returned
//! graph frees all of it as a unit, in reverse construction order.

pub mod descriptor;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::arena::SlotVec;
use crate::error::{EngineError, Result};
use crate::events::ObserverRegistry;
use crate::graph::{Graph, GraphCore, GraphId, GraphStatus, Traits};
use crate::nested::{ChainReduceNode, ComponentNode, MapNode, MeshNode, ReduceNode};
use crate::node::{NodeBody, NodeMeta, NodeScheduler, StubBody};
use crate::nodes::{ComputeNode, ContextNode, GeneratorNode, LastValuePullNode, PushQueueNode};
use crate::push::{PushQueue, WakeSignal};
use crate::time::EngineTime;
use crate::ts::{alloc_endpoint, resolve, InputSlot, TsArena, TsId, ViewData};
use crate::types::{TsMeta, TypeMeta};

pub use descriptor::{
    ComputeFn, Edge, GeneratorFn, InputDecl, MapSpec, NestedSpec, NodeBuilder, NodeKind,
    NodeSignature, ReduceSpec,
};

/// Everything a build inherits from its surroundings: identity, traits,
/// observers, and the shared wake/stop machinery of the root executor.
#[derive(Clone)]
pub struct BuildEnv {
    /// Id path of the graph being built.
    pub id: GraphId,
    /// Traits layer for the new graph.
    pub traits: Traits,
    /// Life-cycle observers.
    pub observers: ObserverRegistry,
    /// Push wake signal.
    pub wake: Arc<WakeSignal>,
    /// Cooperative stop flag.
    pub stop_flag: Arc<AtomicBool>,
}

impl BuildEnv {
    /// An environment for a root graph.
    pub fn root() -> Self {
        BuildEnv {
            id: GraphId::root(),
            traits: Traits::new(),
            observers: ObserverRegistry::new(),
            wake: WakeSignal::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The environment of a graph nested under `node`, instance `ordinal`.
    pub fn nested(parent: &GraphCore, node: usize, ordinal: usize) -> Self {
        BuildEnv {
            id: parent.id.child(node, ordinal),
            traits: parent.traits.chain(),
            observers: parent.observers.clone(),
            wake: Arc::clone(&parent.wake),
            stop_flag: Arc::clone(&parent.stop_flag),
        }
    }
}

/// An ordered list of node descriptors and the edges between them.
#[derive(Clone, Default)]
pub struct GraphBuilder {
    /// Display name of graphs built from this.
    pub name: String,
    /// Node descriptors in index order; the order is the evaluation order
    /// within a tick, so it must be topological.
    pub nodes: Vec<NodeBuilder>,
    /// Edges to wire.
    pub edges: Vec<Edge>,
}

impl GraphBuilder {
    /// An empty builder.
    pub fn new(name: impl Into<String>) -> Self {
        GraphBuilder {
            name: name.into(),
            ..GraphBuilder::default()
        }
    }

    /// Appends a node, returning its index.
    pub fn add_node(&mut self, node: NodeBuilder) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Appends an edge.
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    /// Wires `src`'s whole output into `dst`'s `input`th input.
    pub fn connect(&mut self, src: usize, dst: usize, input: usize) {
        self.add_edge(Edge::direct(src, dst, input));
    }

    /// Total arena slots this graph will occupy.
    pub fn memory_size(&self) -> usize {
        self.nodes.iter().map(NodeBuilder::memory_size).sum()
    }

    /// Builds a graph: allocates the arena once, constructs every node and
    /// endpoint in place, then wires the edges.
    pub fn build(&self, env: BuildEnv) -> Result<Graph> {
        let mut arena = TsArena::with_capacity(self.memory_size());
        let mut nodes = SlotVec::with_capacity(self.nodes.len());
        let mut bodies: SlotVec<_, RefCell<Box<dyn NodeBody>>> =
            SlotVec::with_capacity(self.nodes.len());
        let mut push_sources = Vec::new();
        let mut pull_sources = Vec::new();

        for builder in &self.nodes {
            let output = builder
                .signature
                .output
                .map(|meta| alloc_endpoint(&mut arena, meta, None));
            let error_output = builder.signature.error_output.then(|| {
                alloc_endpoint(&mut arena, TsMeta::ts(TypeMeta::str_()), None)
            });
            let state_output = builder
                .signature
                .state_output
                .map(|meta| alloc_endpoint(&mut arena, meta, None));
            let inputs = builder
                .signature
                .inputs
                .iter()
                .map(|decl| InputSlot::new(decl.name.clone(), decl.meta, decl.active))
                .collect();

            let node = nodes.insert_with_key(|index| NodeMeta {
                index,
                name: builder.signature.name.clone(),
                kind: kind_name(&builder.kind),
                inputs,
                output,
                error_output,
                state_output,
                scheduler: NodeScheduler::new(),
                started: false,
                is_push_source: matches!(builder.kind, NodeKind::PushQueue { .. }),
                is_pull_source: matches!(
                    builder.kind,
                    NodeKind::Generator(_) | NodeKind::LastValuePull { .. }
                ),
            });
            if nodes[node].is_push_source {
                push_sources.push(node);
            }
            if nodes[node].is_pull_source {
                pull_sources.push(node);
            }
            bodies.insert(RefCell::new(make_body(builder, &env)));
        }

        let mut graph = Graph {
            core: GraphCore {
                id: env.id,
                name: self.name.clone(),
                nodes,
                arena,
                queue: BTreeMap::new(),
                pending: Vec::new(),
                now: EngineTime::MIN_DT,
                traits: env.traits,
                push_sources,
                pull_sources,
                status: GraphStatus::Created,
                observers: env.observers,
                stop_flag: env.stop_flag,
                wake: env.wake,
            },
            bodies,
        };

        for edge in &self.edges {
            self.wire(&mut graph, edge)?;
        }
        Ok(graph)
    }

    fn wire(&self, graph: &mut Graph, edge: &Edge) -> Result<()> {
        let node_count = graph.core.nodes.len();
        if edge.src_node >= node_count {
            return Err(EngineError::UnknownNode(edge.src_node));
        }
        if edge.dst_node >= node_count {
            return Err(EngineError::UnknownNode(edge.dst_node));
        }
        let src = crate::node::NodeId::from_raw(edge.src_node);
        let dst = crate::node::NodeId::from_raw(edge.dst_node);

        let output = self.locate_output(graph, src, &edge.output_path)?;
        let &[input_index] = edge.input_path.as_slice() else {
            return Err(EngineError::UnknownPath {
                path: edge.input_path.clone(),
                meta: graph.core.node_path(dst),
            });
        };
        let GraphCore { nodes, arena, .. } = &mut graph.core;
        let meta = &mut nodes[dst];
        let notifier = meta.notifier();
        let input = meta
            .inputs
            .get_mut(input_index)
            .ok_or(EngineError::UnknownNode(input_index))?;
        input.bind_output(arena, output, notifier)
    }

    /// Walks `path` from a node's main output through static children.
    fn locate_output(&self, graph: &Graph, src: crate::node::NodeId, path: &[usize]) -> Result<TsId> {
        let root = graph.core.nodes[src]
            .output
            .ok_or_else(|| EngineError::NotBound(graph.core.node_path(src)))?;
        let mut data = ViewData::root(root);
        for &component in path {
            data = data.child(component);
        }
        let resolved = resolve(&graph.core.arena, &data)?;
        if resolved.slot.is_some() {
            return Err(EngineError::UnknownPath {
                path: path.to_vec(),
                meta: graph.core.arena[resolved.ts].meta().name().to_owned(),
            });
        }
        Ok(resolved.ts)
    }
}

fn kind_name(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Compute(_) => "compute",
        NodeKind::Generator(_) => "generator",
        NodeKind::LastValuePull { .. } => "last-value-pull",
        NodeKind::PushQueue { .. } => "push-queue",
        NodeKind::Component(_) => "component",
        NodeKind::Map(_) => "map",
        NodeKind::Mesh(_) => "mesh",
        NodeKind::Reduce(_) => "reduce",
        NodeKind::NonAssocReduce(_) => "non-assoc-reduce",
        NodeKind::Context { .. } => "context",
        NodeKind::Stub => "stub",
    }
}

fn make_body(builder: &NodeBuilder, env: &BuildEnv) -> Box<dyn NodeBody> {
    match &builder.kind {
        NodeKind::Compute(body) => Box::new(ComputeNode::new(Rc::clone(body))),
        NodeKind::Generator(body) => Box::new(GeneratorNode::new(body.clone())),
        NodeKind::LastValuePull { schedule } => {
            Box::new(LastValuePullNode::new(schedule.clone()))
        }
        NodeKind::PushQueue { capacity, policy } => {
            let batch = builder
                .scalars
                .get("batch")
                .and_then(|value| i64::try_from(value).ok())
                .map_or(1, |batch| batch.max(1) as usize);
            Box::new(PushQueueNode::new(
                PushQueue::new(*capacity, *policy, Arc::clone(&env.wake)),
                batch,
            ))
        }
        NodeKind::Component(spec) => Box::new(ComponentNode::new(spec.clone())),
        NodeKind::Map(spec) => Box::new(MapNode::new(spec.clone())),
        NodeKind::Mesh(spec) => Box::new(MeshNode::new(spec.clone())),
        NodeKind::Reduce(spec) => Box::new(ReduceNode::new(spec.clone())),
        NodeKind::NonAssocReduce(spec) => Box::new(ChainReduceNode::new(spec.clone())),
        NodeKind::Context { key } => Box::new(ContextNode::new(key.clone())),
        NodeKind::Stub => Box::new(StubBody),
    }
}

/// Convenience: a stub node descriptor with just an output.
pub fn stub(name: &str, output: &'static TsMeta) -> NodeBuilder {
    NodeBuilder::new(NodeSignature::new(name).with_output(output), NodeKind::Stub)
}

/// Convenience: a compute node descriptor.
pub fn compute(signature: NodeSignature, body: ComputeFn) -> NodeBuilder {
    NodeBuilder::new(signature, NodeKind::Compute(body))
}

/// Convenience: a push-queue source descriptor with default policy.
pub fn push_source(name: &str, output: &'static TsMeta) -> NodeBuilder {
    NodeBuilder::new(
        NodeSignature::new(name).with_output(output),
        NodeKind::PushQueue {
            capacity: None,
            policy: crate::push::OverflowPolicy::DropOldest,
        },
    )
}
