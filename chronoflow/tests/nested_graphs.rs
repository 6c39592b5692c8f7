//! Component, map, mesh, reduce, and chain-reduce nodes over child graphs.

use std::rc::Rc;

use chronoflow::builder::{
    compute, stub, BuildEnv, GraphBuilder, MapSpec, NestedSpec, NodeBuilder, NodeKind,
    NodeSignature, ReduceSpec,
};
use chronoflow::graph::EvalContext;
use chronoflow::nested::MeshHandle;
use chronoflow::node::NodeId;
use chronoflow::time::EngineTime;
use chronoflow::types::{TsMeta, TypeMeta, Value, ValueMap};
use chronoflow::EngineError;
use rustc_hash::FxHashMap;

fn t(secs: i64) -> EngineTime {
    EngineTime::from_secs(secs)
}

fn dict_value(entries: &[(Value, Value)]) -> Value {
    Value::Map(Box::new(
        entries.iter().cloned().collect::<ValueMap>(),
    ))
}

/// lhs + rhs combiner child graph: two stubs into one compute.
fn sum_combiner() -> Rc<GraphBuilder> {
    let ts_int = TsMeta::ts(TypeMeta::int());
    let mut builder = GraphBuilder::new("sum");
    let lhs = builder.add_node(stub("lhs", ts_int));
    let rhs = builder.add_node(stub("rhs", ts_int));
    let sum = builder.add_node(compute(
        NodeSignature::new("sum")
            .with_input("lhs", ts_int, true)
            .with_input("rhs", ts_int, true)
            .with_output(ts_int),
        Rc::new(|cx: &mut EvalContext| {
            let lhs = i64::try_from(&cx.input(0)?.value()?).unwrap_or(0);
            let rhs = i64::try_from(&cx.input(1)?.value()?).unwrap_or(0);
            cx.output()?.set_value(Value::Int(lhs + rhs))
        }),
    ));
    builder.connect(lhs, sum, 0);
    builder.connect(rhs, sum, 1);
    Rc::new(builder)
}

#[test]
fn reduce_grows_with_the_dict() {
    let ts_int = TsMeta::ts(TypeMeta::int());
    let tsd = TsMeta::tsd(TypeMeta::int(), TypeMeta::int());

    let mut builder = GraphBuilder::new("s5");
    let dict = builder.add_node(stub("dict", tsd));
    let reduce = builder.add_node(NodeBuilder::new(
        NodeSignature::new("reduce")
            .with_input("ts", tsd, true)
            .with_output(ts_int),
        NodeKind::Reduce(ReduceSpec {
            builder: sum_combiner(),
            lhs_node_id: 0,
            rhs_node_id: 1,
            output_node_id: 2,
            zero: Value::Int(0),
            key_arg: "ts".to_owned(),
        }),
    ));
    builder.connect(dict, reduce, 0);

    let mut graph = builder.build(BuildEnv::root()).expect("graph builds");
    graph.start(t(0)).expect("graph starts");
    let dict_node = NodeId::from_raw(dict);
    let reduce_node = NodeId::from_raw(reduce);

    let expect = |at: i64, entries: &[(i64, i64)], total: i64, graph: &mut chronoflow::Graph| {
        let entries: Vec<(Value, Value)> = entries
            .iter()
            .map(|(k, v)| (Value::Int(*k), Value::Int(*v)))
            .collect();
        graph
            .inject_output(dict_node, t(at), dict_value(&entries))
            .expect("inject");
        graph.drive_to(t(at)).expect("drive");
        let view = graph.output_view(reduce_node).expect("output");
        assert_eq!(view.value().unwrap(), Value::Int(total));
        assert!(view.modified(t(at)).unwrap());
    };

    expect(1, &[(1, 10)], 10, &mut graph);
    expect(2, &[(1, 10), (2, 20)], 30, &mut graph);
    expect(3, &[(1, 10), (2, 20), (3, 30)], 60, &mut graph);

    graph.stop().expect("graph stops");
    graph.dispose().expect("graph disposes");
}

#[test]
fn chain_reduce_is_order_dependent() {
    let ts_int = TsMeta::ts(TypeMeta::int());
    let tsd = TsMeta::tsd(TypeMeta::int(), TypeMeta::int());

    // lhs * 2 + rhs: a deliberately non-associative combiner.
    let combiner = {
        let mut builder = GraphBuilder::new("affine");
        let lhs = builder.add_node(stub("lhs", ts_int));
        let rhs = builder.add_node(stub("rhs", ts_int));
        let out = builder.add_node(compute(
            NodeSignature::new("affine")
                .with_input("lhs", ts_int, true)
                .with_input("rhs", ts_int, true)
                .with_output(ts_int),
            Rc::new(|cx: &mut EvalContext| {
                let lhs = i64::try_from(&cx.input(0)?.value()?).unwrap_or(0);
                let rhs = i64::try_from(&cx.input(1)?.value()?).unwrap_or(0);
                cx.output()?.set_value(Value::Int(lhs * 2 + rhs))
            }),
        ));
        builder.connect(lhs, out, 0);
        builder.connect(rhs, out, 1);
        Rc::new(builder)
    };

    let mut builder = GraphBuilder::new("chain");
    let dict = builder.add_node(stub("dict", tsd));
    let chain = builder.add_node(NodeBuilder::new(
        NodeSignature::new("chain")
            .with_input("ts", tsd, true)
            .with_output(ts_int),
        NodeKind::NonAssocReduce(ReduceSpec {
            builder: combiner,
            lhs_node_id: 0,
            rhs_node_id: 1,
            output_node_id: 2,
            zero: Value::Int(0),
            key_arg: "ts".to_owned(),
        }),
    ));
    builder.connect(dict, chain, 0);

    let mut graph = builder.build(BuildEnv::root()).expect("graph builds");
    graph.start(t(0)).expect("graph starts");
    let dict_node = NodeId::from_raw(dict);
    let chain_node = NodeId::from_raw(chain);

    graph
        .inject_output(dict_node, t(1), dict_value(&[(Value::Int(1), Value::Int(1))]))
        .unwrap();
    graph.drive_to(t(1)).unwrap();
    assert_eq!(
        graph.output_view(chain_node).unwrap().value().unwrap(),
        Value::Int(1) // (0 * 2) + 1
    );

    graph
        .inject_output(
            dict_node,
            t(2),
            dict_value(&[(Value::Int(1), Value::Int(1)), (Value::Int(2), Value::Int(2))]),
        )
        .unwrap();
    graph.drive_to(t(2)).unwrap();
    assert_eq!(
        graph.output_view(chain_node).unwrap().value().unwrap(),
        Value::Int(4) // ((0 * 2) + 1) * 2 + 2
    );

    graph.stop().unwrap();
    graph.dispose().unwrap();
}

#[test]
fn map_builds_and_tears_down_children_per_key() {
    let ts_int = TsMeta::ts(TypeMeta::int());
    let ts_str = TsMeta::ts(TypeMeta::str_());
    let tsd = TsMeta::tsd(TypeMeta::str_(), TypeMeta::int());

    // Per-key child: double the key's value.
    let child = {
        let mut builder = GraphBuilder::new("per_key");
        let key = builder.add_node(stub("key", ts_str));
        let value = builder.add_node(stub("value", ts_int));
        let double = builder.add_node(compute(
            NodeSignature::new("double")
                .with_input("value", ts_int, true)
                .with_output(ts_int),
            Rc::new(|cx: &mut EvalContext| {
                let value = i64::try_from(&cx.input(0)?.value()?)?;
                cx.output()?.set_value(Value::Int(value * 2))
            }),
        ));
        builder.connect(value, double, 0);
        let _ = key;
        Rc::new(builder)
    };

    let mut input_node_ids = FxHashMap::default();
    input_node_ids.insert("ts".to_owned(), 1);

    let mut builder = GraphBuilder::new("map");
    let dict = builder.add_node(stub("dict", tsd));
    let map = builder.add_node(NodeBuilder::new(
        NodeSignature::new("map")
            .with_input("ts", tsd, true)
            .with_output(tsd),
        NodeKind::Map(MapSpec {
            nested: NestedSpec {
                builder: child,
                input_node_ids,
                output_node_id: 2,
            },
            key_arg: "ts".to_owned(),
            key_node_id: 0,
            multiplexed_args: Vec::new(),
        }),
    ));
    builder.connect(dict, map, 0);

    let mut graph = builder.build(BuildEnv::root()).expect("graph builds");
    graph.start(t(0)).unwrap();
    let dict_node = NodeId::from_raw(dict);
    let map_node = NodeId::from_raw(map);

    graph
        .inject_output(dict_node, t(1), dict_value(&[("a".into(), Value::Int(3))]))
        .unwrap();
    graph.drive_to(t(1)).unwrap();
    let view = graph.output_view(map_node).unwrap();
    assert_eq!(view.get_item(&"a".into()).unwrap(), Some(Value::Int(6)));

    graph
        .inject_output(
            dict_node,
            t(2),
            dict_value(&[("a".into(), Value::Int(3)), ("b".into(), Value::Int(4))]),
        )
        .unwrap();
    graph.drive_to(t(2)).unwrap();
    let view = graph.output_view(map_node).unwrap();
    assert_eq!(view.get_item(&"b".into()).unwrap(), Some(Value::Int(8)));
    assert_eq!(view.len().unwrap(), 2);

    // Dropping "a" tears its child down and removes the projection.
    graph
        .inject_output(dict_node, t(3), dict_value(&[("b".into(), Value::Int(4))]))
        .unwrap();
    graph.drive_to(t(3)).unwrap();
    let view = graph.output_view(map_node).unwrap();
    assert_eq!(view.get_item(&"a".into()).unwrap(), None);
    assert_eq!(view.removed(t(3)).unwrap(), vec![Value::from("a")]);

    graph.stop().unwrap();
    graph.dispose().unwrap();
}

#[test]
fn mesh_ranks_and_cycle_detection() {
    let ts_str = TsMeta::ts(TypeMeta::str_());
    let tsd = TsMeta::tsd(TypeMeta::str_(), TypeMeta::int());

    // Child: echo the key.
    let child = {
        let mut builder = GraphBuilder::new("echo");
        let key = builder.add_node(stub("key", ts_str));
        let echo = builder.add_node(compute(
            NodeSignature::new("echo")
                .with_input("key", ts_str, true)
                .with_output(ts_str),
            Rc::new(|cx: &mut EvalContext| {
                let key = cx.input(0)?.value()?;
                cx.output()?.set_value(key)
            }),
        ));
        builder.connect(key, echo, 0);
        Rc::new(builder)
    };

    let mut builder = GraphBuilder::new("mesh");
    let dict = builder.add_node(stub("dict", tsd));
    let mesh = builder.add_node(NodeBuilder::new(
        NodeSignature::new("ranked")
            .with_input("ts", tsd, true)
            .with_output(TsMeta::tsd(TypeMeta::str_(), TypeMeta::str_())),
        NodeKind::Mesh(MapSpec {
            nested: NestedSpec {
                builder: child,
                input_node_ids: FxHashMap::default(),
                output_node_id: 1,
            },
            key_arg: "ts".to_owned(),
            key_node_id: 0,
            multiplexed_args: Vec::new(),
        }),
    ));
    builder.connect(dict, mesh, 0);

    let mut graph = builder.build(BuildEnv::root()).expect("graph builds");
    graph.start(t(0)).unwrap();
    let dict_node = NodeId::from_raw(dict);

    graph
        .inject_output(
            dict_node,
            t(1),
            dict_value(&[
                ("A".into(), Value::Int(1)),
                ("B".into(), Value::Int(2)),
                ("C".into(), Value::Int(3)),
            ]),
        )
        .unwrap();
    graph.drive_to(t(1)).unwrap();

    let handle: MeshHandle = graph
        .core
        .traits
        .get_as("mesh.ranked")
        .expect("mesh publishes its handle");

    handle
        .declare_dependency("B".into(), "A".into())
        .expect("B depends on A");
    handle
        .declare_dependency("C".into(), "B".into())
        .expect("C depends on B");
    assert_eq!(handle.rank(&"A".into()), 0);
    assert_eq!(handle.rank(&"B".into()), 1);
    assert_eq!(handle.rank(&"C".into()), 2);

    let cycle = handle
        .declare_dependency("A".into(), "C".into())
        .unwrap_err();
    assert!(matches!(cycle, EngineError::DependencyCycle { .. }));

    graph.stop().unwrap();
    graph.dispose().unwrap();
}

#[test]
fn component_projects_inputs_and_output() {
    let ts_int = TsMeta::ts(TypeMeta::int());

    let child = {
        let mut builder = GraphBuilder::new("inner");
        let input = builder.add_node(stub("in", ts_int));
        let double = builder.add_node(compute(
            NodeSignature::new("double")
                .with_input("in", ts_int, true)
                .with_output(ts_int),
            Rc::new(|cx: &mut EvalContext| {
                let value = i64::try_from(&cx.input(0)?.value()?)?;
                cx.output()?.set_value(Value::Int(value * 2))
            }),
        ));
        builder.connect(input, double, 0);
        Rc::new(builder)
    };

    let mut input_node_ids = FxHashMap::default();
    input_node_ids.insert("in".to_owned(), 0);

    let mut builder = GraphBuilder::new("outer");
    let source = builder.add_node(stub("source", ts_int));
    let component = builder.add_node(NodeBuilder::new(
        NodeSignature::new("wrapped")
            .with_input("in", ts_int, true)
            .with_output(ts_int),
        NodeKind::Component(NestedSpec {
            builder: child,
            input_node_ids,
            output_node_id: 1,
        }),
    ));
    builder.connect(source, component, 0);

    let mut graph = builder.build(BuildEnv::root()).expect("graph builds");
    graph.start(t(0)).unwrap();
    let source_node = NodeId::from_raw(source);
    let component_node = NodeId::from_raw(component);

    graph.inject_output(source_node, t(1), Value::Int(21)).unwrap();
    graph.drive_to(t(1)).unwrap();
    let view = graph.output_view(component_node).unwrap();
    assert_eq!(view.value().unwrap(), Value::Int(42));
    assert!(view.modified(t(1)).unwrap());

    graph.stop().unwrap();
    graph.dispose().unwrap();
}
