//! Scalar propagation through a push source and a compute node.

use std::cell::RefCell;
use std::rc::Rc;

use chronoflow::builder::{compute, push_source, GraphBuilder, NodeSignature};
use chronoflow::executor::{ExecutionConfig, GraphExecutor};
use chronoflow::graph::EvalContext;
use chronoflow::time::EngineTime;
use chronoflow::types::{TsMeta, TypeMeta, Value};

#[test]
fn push_messages_double_and_propagate_at_their_times() {
    let ts_int = TsMeta::ts(TypeMeta::int());
    let seen: Rc<RefCell<Vec<(EngineTime, i64)>>> = Rc::new(RefCell::new(Vec::new()));

    let mut builder = GraphBuilder::new("s1");
    let src = builder.add_node(push_source("src", ts_int));
    let doubler = builder.add_node(compute(
        NodeSignature::new("double")
            .with_input("in", ts_int, true)
            .with_output(ts_int),
        Rc::new(|cx: &mut EvalContext| {
            let input = i64::try_from(&cx.input(0)?.value()?)?;
            cx.output()?.set_value(Value::Int(input * 2))
        }),
    ));
    let recorder = {
        let seen = Rc::clone(&seen);
        builder.add_node(compute(
            NodeSignature::new("record").with_input("in", ts_int, true),
            Rc::new(move |cx: &mut EvalContext| {
                let value = i64::try_from(&cx.input(0)?.value()?)?;
                seen.borrow_mut().push((cx.now(), value));
                Ok(())
            }),
        ))
    };
    builder.connect(src, doubler, 0);
    builder.connect(doubler, recorder, 0);

    let mut executor = GraphExecutor::new(
        &builder,
        ExecutionConfig::simulation(EngineTime::from_secs(0), EngineTime::from_secs(10)),
    )
    .expect("graph builds");

    let sender = executor.push_sender(src).expect("src is a push source");
    sender.send_at(EngineTime::from_secs(1), Value::Int(5));
    sender.send_at(EngineTime::from_secs(3), Value::Int(7));

    executor.run().expect("run completes");

    // Modified at t=1 with 10 and t=3 with 14; never at t=2 or t=4.
    assert_eq!(
        &*seen.borrow(),
        &[
            (EngineTime::from_secs(1), 10),
            (EngineTime::from_secs(3), 14),
        ]
    );
}

#[test]
fn nodes_are_stopped_and_inputs_unbound_after_a_run() {
    let ts_int = TsMeta::ts(TypeMeta::int());
    let mut builder = GraphBuilder::new("lifecycle");
    let src = builder.add_node(push_source("src", ts_int));
    let sink = builder.add_node(compute(
        NodeSignature::new("sink").with_input("in", ts_int, true),
        Rc::new(|_cx: &mut EvalContext| Ok(())),
    ));
    builder.connect(src, sink, 0);

    let mut executor = GraphExecutor::new(
        &builder,
        ExecutionConfig::simulation(EngineTime::from_secs(0), EngineTime::from_secs(1)),
    )
    .expect("graph builds");
    executor.push_sender(src).unwrap().send_at(EngineTime::from_secs(0), Value::Int(1));
    executor.run().expect("run completes");

    let graph = executor.graph();
    for (_, node) in graph.core.nodes.iter() {
        assert!(!node.started);
        for input in &node.inputs {
            assert!(input.link.target.is_none());
        }
    }
}
