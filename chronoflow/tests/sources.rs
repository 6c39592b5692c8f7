//! Pull sources, generators, error outputs, and push backpressure.

use std::cell::RefCell;
use std::rc::Rc;

use chronoflow::builder::{compute, GraphBuilder, NodeBuilder, NodeKind, NodeSignature};
use chronoflow::executor::{ExecutionConfig, GraphExecutor};
use chronoflow::graph::EvalContext;
use chronoflow::push::OverflowPolicy;
use chronoflow::time::EngineTime;
use chronoflow::types::{TsMeta, TypeMeta, Value};
use chronoflow::EngineError;

fn t(secs: i64) -> EngineTime {
    EngineTime::from_secs(secs)
}

fn recorder(
    builder: &mut GraphBuilder,
    meta: &'static TsMeta,
    seen: &Rc<RefCell<Vec<(EngineTime, Value)>>>,
) -> usize {
    let seen = Rc::clone(seen);
    builder.add_node(compute(
        NodeSignature::new("record").with_input("in", meta, true),
        Rc::new(move |cx: &mut EvalContext| {
            let value = cx.input(0)?.value()?;
            seen.borrow_mut().push((cx.now(), value));
            Ok(())
        }),
    ))
}

#[test]
fn generator_emits_and_self_schedules() {
    let ts_int = TsMeta::ts(TypeMeta::int());
    let seen = Rc::new(RefCell::new(Vec::new()));

    let mut builder = GraphBuilder::new("generator");
    let counter = Rc::new(RefCell::new(0i64));
    let body = {
        let counter = Rc::clone(&counter);
        move |_from: EngineTime| {
            let mut counter = counter.borrow_mut();
            *counter += 2;
            (*counter <= 6).then(|| (t(*counter), Value::Int(*counter)))
        }
    };
    let source = builder.add_node(NodeBuilder::new(
        NodeSignature::new("gen").with_output(ts_int),
        NodeKind::Generator(Rc::new(RefCell::new(body))),
    ));
    let sink = recorder(&mut builder, ts_int, &seen);
    builder.connect(source, sink, 0);

    let mut executor = GraphExecutor::new(
        &builder,
        ExecutionConfig::simulation(t(0), t(10)),
    )
    .expect("graph builds");
    executor.run().expect("run completes");

    assert_eq!(
        &*seen.borrow(),
        &[
            (t(2), Value::Int(2)),
            (t(4), Value::Int(4)),
            (t(6), Value::Int(6)),
        ]
    );
}

#[test]
fn last_value_pull_collapses_same_time_entries() {
    let ts_int = TsMeta::ts(TypeMeta::int());
    let seen = Rc::new(RefCell::new(Vec::new()));

    let mut builder = GraphBuilder::new("pull");
    let source = builder.add_node(NodeBuilder::new(
        NodeSignature::new("pull").with_output(ts_int),
        NodeKind::LastValuePull {
            schedule: vec![
                (t(1), Value::Int(10)),
                (t(1), Value::Int(11)),
                (t(3), Value::Int(12)),
            ],
        },
    ));
    let sink = recorder(&mut builder, ts_int, &seen);
    builder.connect(source, sink, 0);

    let mut executor = GraphExecutor::new(
        &builder,
        ExecutionConfig::simulation(t(0), t(10)),
    )
    .expect("graph builds");
    executor.run().expect("run completes");

    // Only the last value per engine time is delivered.
    assert_eq!(
        &*seen.borrow(),
        &[(t(1), Value::Int(11)), (t(3), Value::Int(12))]
    );
}

#[test]
fn user_errors_publish_to_the_error_output_and_the_run_continues() {
    let ts_int = TsMeta::ts(TypeMeta::int());

    let mut builder = GraphBuilder::new("failing");
    let source = builder.add_node(NodeBuilder::new(
        NodeSignature::new("pull").with_output(ts_int),
        NodeKind::LastValuePull {
            schedule: vec![(t(1), Value::Int(1)), (t(2), Value::Int(2))],
        },
    ));
    let failing = builder.add_node(compute(
        NodeSignature::new("sometimes")
            .with_input("in", ts_int, true)
            .with_output(ts_int)
            .with_error_output(),
        Rc::new(|cx: &mut EvalContext| {
            let value = i64::try_from(&cx.input(0)?.value()?)?;
            if value == 1 {
                return Err(cx.user_error("one is not acceptable"));
            }
            cx.output()?.set_value(Value::Int(value))
        }),
    ));
    builder.connect(source, failing, 0);

    let mut executor = GraphExecutor::new(
        &builder,
        ExecutionConfig::simulation(t(0), t(10)),
    )
    .expect("graph builds");

    // Peek at the error output before teardown via a scoped run.
    let graph = executor.graph_mut();
    graph.start(t(0)).unwrap();
    graph.drive_to(t(1)).unwrap();
    {
        let failing_id = chronoflow::node::NodeId::from_raw(failing);
        let error_output = graph.core.nodes[failing_id].error_output.expect("declared");
        let view = chronoflow::ts::TsView::new(
            &graph.core.arena,
            chronoflow::ts::ViewData::root(error_output),
        );
        assert!(view.modified(t(1)).unwrap());
        let Value::Str(message) = view.value().unwrap() else {
            panic!("error output holds a string");
        };
        assert!(message.contains("one is not acceptable"));
    }
    // The failure did not poison the graph: the next tick still computes.
    graph.drive_to(t(2)).unwrap();
    let failing_id = chronoflow::node::NodeId::from_raw(failing);
    assert_eq!(
        graph.output_view(failing_id).unwrap().value().unwrap(),
        Value::Int(2)
    );
    graph.stop().unwrap();
    graph.dispose().unwrap();
}

#[test]
fn bounded_push_queue_with_raise_policy_fails_the_run() {
    let ts_int = TsMeta::ts(TypeMeta::int());

    let mut builder = GraphBuilder::new("overflow");
    let source = builder.add_node(NodeBuilder::new(
        NodeSignature::new("push").with_output(ts_int),
        NodeKind::PushQueue {
            capacity: Some(1),
            policy: OverflowPolicy::Raise,
        },
    ));
    let sink = {
        builder.add_node(compute(
            NodeSignature::new("sink").with_input("in", ts_int, true),
            Rc::new(|_cx: &mut EvalContext| Ok(())),
        ))
    };
    builder.connect(source, sink, 0);

    let mut executor = GraphExecutor::new(
        &builder,
        ExecutionConfig::simulation(t(0), t(10)),
    )
    .expect("graph builds");
    let sender = executor.push_sender(source).unwrap();
    sender.send_at(t(1), Value::Int(1));
    sender.send_at(t(2), Value::Int(2));

    let error = executor.run().unwrap_err();
    assert!(matches!(
        error,
        EngineError::PushQueueOverflow { capacity: 1, .. }
    ));
}

#[test]
fn stop_requests_cut_a_real_time_run_short() {
    let ts_int = TsMeta::ts(TypeMeta::int());

    let mut builder = GraphBuilder::new("realtime");
    let source = builder.add_node(NodeBuilder::new(
        NodeSignature::new("push").with_output(ts_int),
        NodeKind::PushQueue {
            capacity: None,
            policy: OverflowPolicy::DropOldest,
        },
    ));
    let sink = builder.add_node(compute(
        NodeSignature::new("sink").with_input("in", ts_int, true),
        Rc::new(|_cx: &mut EvalContext| Ok(())),
    ));
    builder.connect(source, sink, 0);

    let start = EngineTime::wall_clock();
    let end = start + chronoflow::EngineTimeDelta::from_secs(3600);
    let mut executor = GraphExecutor::new(
        &builder,
        ExecutionConfig::real_time(start, end)
            .with_idle_park(std::time::Duration::from_millis(10)),
    )
    .expect("graph builds");

    let stop = executor.stop_handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(50));
        stop.request_engine_stop();
    });

    executor.run().expect("run unwinds cleanly");
    stopper.join().unwrap();
    assert!(!executor.graph().is_started());
}
