//! Delta tracking of bundle and dict endpoints, straight at the arena.

use chronoflow::time::EngineTime;
use chronoflow::ts::{alloc_endpoint, Notifier, TsArena, TsOutputView, TsView, ViewData};
use chronoflow::types::{TsMeta, TypeMeta, Value};

fn t(secs: i64) -> EngineTime {
    EngineTime::from_secs(secs)
}

#[test]
fn bundle_partial_updates_track_field_deltas() {
    let meta = TsMeta::tsb(&[
        ("a", TsMeta::ts(TypeMeta::int())),
        ("b", TsMeta::ts(TypeMeta::int())),
    ]);
    let mut arena = TsArena::new();
    let mut sink = Vec::new();
    let root = alloc_endpoint(&mut arena, meta, None);

    // Initial (0, 0) at t=0.
    TsOutputView::new(&mut arena, &mut sink, t(0), ViewData::root(root))
        .set_value(Value::Bundle(vec![Value::Int(0), Value::Int(0)]))
        .unwrap();

    // a = 1 at t=1.
    TsOutputView::new(&mut arena, &mut sink, t(1), ViewData::root(root))
        .field("a")
        .unwrap()
        .set_value(Value::Int(1))
        .unwrap();
    let view = TsView::new(&arena, ViewData::root(root));
    assert!(view.modified(t(1)).unwrap());
    assert_eq!(
        view.value().unwrap(),
        Value::Bundle(vec![Value::Int(1), Value::Int(0)])
    );
    assert_eq!(
        view.delta_value(t(1)).unwrap(),
        Value::Bundle(vec![Value::Int(1), Value::Nothing])
    );

    // b = 2 at t=2.
    TsOutputView::new(&mut arena, &mut sink, t(2), ViewData::root(root))
        .field("b")
        .unwrap()
        .set_value(Value::Int(2))
        .unwrap();
    let view = TsView::new(&arena, ViewData::root(root));
    assert_eq!(
        view.value().unwrap(),
        Value::Bundle(vec![Value::Int(1), Value::Int(2)])
    );
    assert_eq!(
        view.delta_value(t(2)).unwrap(),
        Value::Bundle(vec![Value::Nothing, Value::Int(2)])
    );
    // The t=1 delta is gone.
    assert!(!view.child_by_name("a").unwrap().modified(t(2)).unwrap());
}

#[test]
fn bundle_observer_notified_once_per_tick_for_many_children() {
    let meta = TsMeta::tsb(&[
        ("a", TsMeta::ts(TypeMeta::int())),
        ("b", TsMeta::ts(TypeMeta::int())),
    ]);
    let mut arena = TsArena::new();
    let mut sink = Vec::new();
    let root = alloc_endpoint(&mut arena, meta, None);

    let watcher = Notifier {
        node: chronoflow::node::NodeId::from_raw(42),
    };
    arena[root].observers_mut().add_observer(watcher);

    // Both fields change within one tick.
    let mut out = TsOutputView::new(&mut arena, &mut sink, t(5), ViewData::root(root));
    out.field("a").unwrap().set_value(Value::Int(1)).unwrap();
    out.field("b").unwrap().set_value(Value::Int(2)).unwrap();

    let bundle_notifications = sink
        .iter()
        .filter(|(node, when)| node.raw() == 42 && *when == t(5))
        .count();
    assert_eq!(bundle_notifications, 1);
}

#[test]
fn dict_add_remove_deltas_and_slot_removal_notification() {
    let meta = TsMeta::tsd(TypeMeta::str_(), TypeMeta::int());
    let mut arena = TsArena::new();
    let mut sink = Vec::new();
    let root = alloc_endpoint(&mut arena, meta, None);

    // Add "x" -> 1 at t=1.
    TsOutputView::new(&mut arena, &mut sink, t(1), ViewData::root(root))
        .insert("x".into(), Value::Int(1))
        .unwrap();
    let view = TsView::new(&arena, ViewData::root(root));
    assert_eq!(view.added(t(1)).unwrap(), vec![Value::from("x")]);
    assert_eq!(view.modified_keys(t(1)).unwrap(), vec![Value::from("x")]);
    assert_eq!(view.len().unwrap(), 1);
    assert_eq!(view.get_item(&"x".into()).unwrap(), Some(Value::Int(1)));

    // Subscribe a watcher to slot "x" before the removal.
    let slot = TsView::new(&arena, ViewData::root(root))
        .key_slot(&"x".into())
        .unwrap()
        .expect("x present");
    let watcher = Notifier {
        node: chronoflow::node::NodeId::from_raw(7),
    };
    chronoflow::ts::subscribe_slot(&mut arena, root, slot, watcher);

    // Remove at t=2.
    sink.clear();
    TsOutputView::new(&mut arena, &mut sink, t(2), ViewData::root(root))
        .remove(&"x".into())
        .unwrap();
    let view = TsView::new(&arena, ViewData::root(root));
    assert_eq!(view.removed(t(2)).unwrap(), vec![Value::from("x")]);
    assert_eq!(view.len().unwrap(), 0);

    // The slot watcher heard about the removal exactly once.
    let removals = sink
        .iter()
        .filter(|(node, when)| node.raw() == 7 && *when == t(2))
        .count();
    assert_eq!(removals, 1);
}

#[test]
fn set_value_round_trip_and_staleness() {
    let meta = TsMeta::ts(TypeMeta::float());
    let mut arena = TsArena::new();
    let mut sink = Vec::new();
    let root = alloc_endpoint(&mut arena, meta, None);

    TsOutputView::new(&mut arena, &mut sink, t(3), ViewData::root(root))
        .set_value(Value::Float(2.5))
        .unwrap();
    let view = TsView::new(&arena, ViewData::root(root));
    assert_eq!(view.value().unwrap(), Value::Float(2.5));
    assert!(view.valid().unwrap());
    assert!(view.modified(t(3)).unwrap());
    // Queried with a later now, the write no longer counts as modified.
    assert!(!view.modified(t(4)).unwrap());
}

#[test]
fn window_pushes_evict_and_track_tick_deltas() {
    let meta = TsMeta::tsw(TypeMeta::int(), 3);
    let mut arena = TsArena::new();
    let mut sink = Vec::new();
    let root = alloc_endpoint(&mut arena, meta, None);

    for (when, value) in [(1, 10), (2, 20), (3, 30), (4, 40)] {
        TsOutputView::new(&mut arena, &mut sink, t(when), ViewData::root(root))
            .push(Value::Int(value))
            .unwrap();
    }
    let view = TsView::new(&arena, ViewData::root(root));
    // Oldest entry was evicted by the capacity-3 ring.
    assert_eq!(
        view.window().unwrap(),
        vec![
            (t(2), Value::Int(20)),
            (t(3), Value::Int(30)),
            (t(4), Value::Int(40)),
        ]
    );
    assert_eq!(view.delta_value(t(4)).unwrap(), Value::List(vec![Value::Int(40)]));
}
