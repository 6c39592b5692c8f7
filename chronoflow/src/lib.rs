//! Chronoflow is a functional reactive time-series graph engine: it
//! evaluates a directed graph of nodes producing and consuming typed
//! time-series values across a strictly ordered sequence of engine times,
//! in deterministic simulation or wall-clock real time.
//!
//! The shape of a graph comes in as language-neutral descriptors
//! ([`builder::GraphBuilder`]); the engine builds each graph into a single
//! arena, wires edges by binding inputs to outputs, and drives evaluation
//! through a per-graph time-ordered queue. Outputs fan modifications out to
//! observer lists, which schedule dependent nodes within the same tick;
//! nested nodes (component, map, mesh, reduce) own whole child graphs and
//! drive them in-line.
//!
//! ```
//! use std::rc::Rc;
//! use chronoflow::builder::{compute, push_source, GraphBuilder, NodeSignature};
//! use chronoflow::executor::{ExecutionConfig, GraphExecutor};
//! use chronoflow::graph::EvalContext;
//! use chronoflow::time::EngineTime;
//! use chronoflow::types::{TsMeta, TypeMeta, Value};
//!
//! let ts_int = TsMeta::ts(TypeMeta::int());
//! let mut builder = GraphBuilder::new("doubler");
//! let src = builder.add_node(push_source("src", ts_int));
//! let dbl = builder.add_node(compute(
//!     NodeSignature::new("double").with_input("in", ts_int, true).with_output(ts_int),
//!     Rc::new(|cx: &mut EvalContext| {
//!         let input = i64::try_from(&cx.input(0)?.value()?)?;
//!         cx.output()?.set_value(Value::Int(input * 2))
//!     }),
//! ));
//! builder.connect(src, dbl, 0);
//!
//! let mut executor = GraphExecutor::new(
//!     &builder,
//!     ExecutionConfig::simulation(EngineTime::from_secs(0), EngineTime::from_secs(10)),
//! )
//! .unwrap();
//! let sender = executor.push_sender(src).unwrap();
//! sender.send_at(EngineTime::from_secs(1), Value::Int(5));
//! executor.run().unwrap();
//! ```

#![forbid(unsafe_code)]

pub mod arena;
pub mod builder;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod nested;
pub mod node;
pub mod nodes;
pub mod push;
pub mod scheduler;
pub mod time;
pub mod ts;
pub mod types;

pub use crate::error::{EngineError, Result};
pub use crate::executor::{ExecutionConfig, GraphExecutor, RunMode};
pub use crate::graph::{Graph, GraphId, Traits};
pub use crate::time::{EngineTime, EngineTimeDelta};
pub use crate::types::{TsMeta, TypeMeta, Value};
