//! Language-neutral node and edge descriptors consumed from the front-end.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::EvalContext;
use crate::push::OverflowPolicy;
use crate::time::EngineTime;
use crate::types::{TsMeta, Value};

use super::GraphBuilder;

/// One declared input of a node signature.
#[derive(Clone)]
pub struct InputDecl {
    /// Input name.
    pub name: String,
    /// Declared time-series meta.
    pub meta: &'static TsMeta,
    /// Whether modifications schedule the node by default.
    pub active: bool,
}

/// Static type information of one node.
#[derive(Clone, Default)]
pub struct NodeSignature {
    /// Display name.
    pub name: String,
    /// Named inputs in order.
    pub inputs: Vec<InputDecl>,
    /// Main output meta, if any.
    pub output: Option<&'static TsMeta>,
    /// Whether the node publishes user errors downstream.
    pub error_output: bool,
    /// Recordable-state output meta, if any.
    pub state_output: Option<&'static TsMeta>,
}

impl NodeSignature {
    /// A signature with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        NodeSignature {
            name: name.into(),
            ..NodeSignature::default()
        }
    }

    /// Adds an input.
    pub fn with_input(mut self, name: &str, meta: &'static TsMeta, active: bool) -> Self {
        self.inputs.push(InputDecl {
            name: name.to_owned(),
            meta,
            active,
        });
        self
    }

    /// Declares the main output.
    pub fn with_output(mut self, meta: &'static TsMeta) -> Self {
        self.output = Some(meta);
        self
    }

    /// Declares an error output (a `TS[str]` publishing failure renderings).
    pub fn with_error_output(mut self) -> Self {
        self.error_output = true;
        self
    }

    /// Declares a recordable-state output.
    pub fn with_state_output(mut self, meta: &'static TsMeta) -> Self {
        self.state_output = Some(meta);
        self
    }
}

/// A user compute body.
pub type ComputeFn = Rc<dyn Fn(&mut EvalContext<'_>) -> Result<()>>;

/// A generator body: maps the current engine time to the next `(time, value)`
/// emission, `None` to finish.
pub type GeneratorFn = Rc<RefCell<dyn FnMut(EngineTime) -> Option<(EngineTime, Value)>>>;

/// Wiring of a nested graph: which child nodes project the parent's inputs
/// and output.
#[derive(Clone)]
pub struct NestedSpec {
    /// The child graph's shape.
    pub builder: Rc<GraphBuilder>,
    /// Parent input name → stub node index in the child.
    pub input_node_ids: FxHashMap<String, usize>,
    /// Child node whose output projects to the parent's output.
    pub output_node_id: usize,
}

/// Wiring of a keyed nested family (map and mesh nodes).
#[derive(Clone)]
pub struct MapSpec {
    /// The per-key child graph's shape and projections.
    pub nested: NestedSpec,
    /// Parent input supplying the key set (a TSD).
    pub key_arg: String,
    /// Child node that receives each instance's key.
    pub key_node_id: usize,
    /// Parent inputs projected per key rather than wholesale.
    pub multiplexed_args: Vec<String>,
}

/// Wiring of a reduction over a TSD.
#[derive(Clone)]
pub struct ReduceSpec {
    /// The combiner child graph: two stubs in, one output.
    pub builder: Rc<GraphBuilder>,
    /// Child stub receiving the left operand.
    pub lhs_node_id: usize,
    /// Child stub receiving the right operand.
    pub rhs_node_id: usize,
    /// Child node whose output is the combination.
    pub output_node_id: usize,
    /// Identity element; fills free leaf slots.
    pub zero: Value,
    /// Parent input supplying the reduced TSD.
    pub key_arg: String,
}

/// What a node does; the signature says what it looks like.
#[derive(Clone)]
pub enum NodeKind {
    /// User compute over typed inputs and outputs.
    Compute(ComputeFn),
    /// Self-scheduling emitter.
    Generator(GeneratorFn),
    /// Pull source primed with a schedule of `(time, value)` pairs; the last
    /// value per time wins.
    LastValuePull {
        /// Delivery schedule.
        schedule: Vec<(EngineTime, Value)>,
    },
    /// Push source fed by external producers.
    PushQueue {
        /// Queue bound; unbounded when `None`.
        capacity: Option<usize>,
        /// Policy when the bound is hit.
        policy: OverflowPolicy,
    },
    /// One nested child graph.
    Component(NestedSpec),
    /// One child graph per key of a TSD input.
    Map(MapSpec),
    /// A map whose children declare dependencies and evaluate in rank order.
    Mesh(MapSpec),
    /// Balanced binary combination of a TSD's values.
    Reduce(ReduceSpec),
    /// Left-folded chain combination of a TSD's values, in key order.
    NonAssocReduce(ReduceSpec),
    /// Publishes a value from the graph's traits at start.
    Context {
        /// Trait name to resolve.
        key: String,
    },
    /// No behavior; the output is written from outside.
    Stub,
}

/// A node descriptor: signature, behavior, and opaque scalars.
#[derive(Clone)]
pub struct NodeBuilder {
    /// Static type information.
    pub signature: NodeSignature,
    /// Behavior.
    pub kind: NodeKind,
    /// Opaque configuration (e.g. `"batch"` for push sources).
    pub scalars: FxHashMap<String, Value>,
}

impl NodeBuilder {
    /// A descriptor from a signature and behavior.
    pub fn new(signature: NodeSignature, kind: NodeKind) -> Self {
        NodeBuilder {
            signature,
            kind,
            scalars: FxHashMap::default(),
        }
    }

    /// Attaches one opaque scalar.
    pub fn with_scalar(mut self, name: &str, value: Value) -> Self {
        self.scalars.insert(name.to_owned(), value);
        self
    }

    /// Arena slots this node will occupy: its endpoints, children included,
    /// plus local REF storage per reference input.
    pub fn memory_size(&self) -> usize {
        let outputs = self.signature.output.map_or(0, TsMeta::slot_budget)
            + usize::from(self.signature.error_output)
            + self.signature.state_output.map_or(0, TsMeta::slot_budget);
        let ref_inputs = self
            .signature
            .inputs
            .iter()
            .filter(|input| input.meta.kind() == crate::types::TsKind::Ref)
            .count();
        outputs + ref_inputs
    }
}

/// One wire: `(src node, output path, dst node, input path)`.
///
/// The output path walks static children of the source's main output; the
/// input path selects the destination input by position.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node index.
    pub src_node: usize,
    /// Path within the source's output tree.
    pub output_path: Vec<usize>,
    /// Destination node index.
    pub dst_node: usize,
    /// Destination input selector.
    pub input_path: Vec<usize>,
}

impl Edge {
    /// A whole-output → named-position edge.
    pub fn direct(src_node: usize, dst_node: usize, input: usize) -> Self {
        Edge {
            src_node,
            output_path: Vec::new(),
            dst_node,
            input_path: vec![input],
        }
    }
}
