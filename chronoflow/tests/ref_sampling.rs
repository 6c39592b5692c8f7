//! REF rebinding: consumers observe a retarget even when the value is equal.

use std::cell::RefCell;
use std::rc::Rc;

use chronoflow::builder::{compute, stub, BuildEnv, GraphBuilder, NodeSignature};
use chronoflow::graph::EvalContext;
use chronoflow::node::NodeId;
use chronoflow::time::EngineTime;
use chronoflow::types::{TsMeta, TsRef, TypeMeta, Value};

fn t(secs: i64) -> EngineTime {
    EngineTime::from_secs(secs)
}

#[test]
fn rebinding_to_an_equal_value_still_reports_modified() {
    let ts_int = TsMeta::ts(TypeMeta::int());
    let ref_meta = TsMeta::reference(ts_int);
    let seen: Rc<RefCell<Vec<(EngineTime, bool, i64)>>> = Rc::new(RefCell::new(Vec::new()));

    let mut builder = GraphBuilder::new("s6");
    let first = builder.add_node(stub("o1", ts_int));
    let second = builder.add_node(stub("o2", ts_int));
    let reference = builder.add_node(stub("ref", ref_meta));
    let consumer = {
        let seen = Rc::clone(&seen);
        builder.add_node(compute(
            NodeSignature::new("consumer").with_input("in", ref_meta, true),
            Rc::new(move |cx: &mut EvalContext| {
                let through = cx.input(0)?.deref()?;
                let modified = through.modified(cx.now())?;
                let value = i64::try_from(&through.value()?)?;
                seen.borrow_mut().push((cx.now(), modified, value));
                Ok(())
            }),
        ))
    };
    builder.connect(reference, consumer, 0);

    let mut graph = builder.build(BuildEnv::root()).expect("graph builds");
    graph.start(t(0)).unwrap();

    let first_node = NodeId::from_raw(first);
    let second_node = NodeId::from_raw(second);
    let ref_node = NodeId::from_raw(reference);

    // Both candidate outputs hold 5; the REF aims at O1.
    graph.inject_output(first_node, t(0), Value::Int(5)).unwrap();
    graph.inject_output(second_node, t(0), Value::Int(5)).unwrap();
    let first_output = graph.core.nodes[first_node].output.expect("stub output");
    graph
        .inject_output(ref_node, t(0), Value::Ref(TsRef(first_output)))
        .unwrap();
    graph.drive_to(t(0)).unwrap();

    // Retarget at t=2 to O2, whose value is identical.
    let second_output = graph.core.nodes[second_node].output.expect("stub output");
    graph
        .inject_output(ref_node, t(2), Value::Ref(TsRef(second_output)))
        .unwrap();
    graph.drive_to(t(2)).unwrap();

    let seen = seen.borrow();
    // The consumer fired at t=0 (initial bind) and t=2 (rebind); the rebind
    // reports modified even though the value through the REF is unchanged.
    assert_eq!(seen.last(), Some(&(t(2), true, 5)));
    assert!(seen.iter().any(|(when, modified, _)| *when == t(0) && *modified));

    graph.stop().unwrap();
    graph.dispose().unwrap();
}

#[test]
fn target_changes_keep_reaching_the_consumer_after_a_rebind() {
    let ts_int = TsMeta::ts(TypeMeta::int());
    let ref_meta = TsMeta::reference(ts_int);
    let seen: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::new()));

    let mut builder = GraphBuilder::new("follow");
    let first = builder.add_node(stub("o1", ts_int));
    let second = builder.add_node(stub("o2", ts_int));
    let reference = builder.add_node(stub("ref", ref_meta));
    let consumer = {
        let seen = Rc::clone(&seen);
        builder.add_node(compute(
            NodeSignature::new("consumer").with_input("in", ref_meta, true),
            Rc::new(move |cx: &mut EvalContext| {
                let value = i64::try_from(&cx.input(0)?.deref()?.value()?)?;
                seen.borrow_mut().push(value);
                Ok(())
            }),
        ))
    };
    builder.connect(reference, consumer, 0);

    let mut graph = builder.build(BuildEnv::root()).expect("graph builds");
    graph.start(t(0)).unwrap();

    let first_node = NodeId::from_raw(first);
    let second_node = NodeId::from_raw(second);
    let ref_node = NodeId::from_raw(reference);

    graph.inject_output(first_node, t(0), Value::Int(1)).unwrap();
    let first_output = graph.core.nodes[first_node].output.unwrap();
    graph
        .inject_output(ref_node, t(0), Value::Ref(TsRef(first_output)))
        .unwrap();
    graph.drive_to(t(0)).unwrap();

    // Rebind to O2, then write through O2: the write must wake the consumer.
    let second_output = graph.core.nodes[second_node].output.unwrap();
    graph
        .inject_output(ref_node, t(1), Value::Ref(TsRef(second_output)))
        .unwrap();
    graph.drive_to(t(1)).unwrap();
    graph.inject_output(second_node, t(2), Value::Int(9)).unwrap();
    graph.drive_to(t(2)).unwrap();

    assert_eq!(seen.borrow().last(), Some(&9));

    // Writes to the abandoned O1 no longer wake the consumer.
    let count_before = seen.borrow().len();
    graph.inject_output(first_node, t(3), Value::Int(8)).unwrap();
    graph.drive_to(t(3)).unwrap();
    assert_eq!(seen.borrow().len(), count_before);

    graph.stop().unwrap();
    graph.dispose().unwrap();
}
