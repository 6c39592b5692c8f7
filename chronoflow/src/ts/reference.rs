//! REF binding, rebinding, and sampled propagation.
//!
//! A REF endpoint's value *is* a reference to another output. Consumers that
//! read through one observe two sources of change: the reference itself
//! retargeting (sampled: `modified` reports true even when the ultimate value
//! is unchanged — the floor carried by [`TsView`](super::view::TsView)), and
//! modifications of the current target. The latter requires following the
//! reference with the subscription, which is what this module does.

use crate::types::{TsKind, TsRef, Value};

use super::input::InputSlot;
use super::observer::Notifier;
use super::value::TsStore;
use super::{TsArena, TsId};

/// The endpoint a REF currently points at, if set.
pub fn ref_target(arena: &TsArena, ts: TsId) -> Option<TsId> {
    match &arena[ts].store {
        TsStore::Scalar(Value::Ref(TsRef(target))) => Some(*target),
        _ => None,
    }
}

/// Re-aims an active input's subscription through its reference.
///
/// Called on activation and again after the owning node evaluates, so that a
/// retarget observed in one tick moves the subscription before the next.
/// Idempotent when the target is unchanged.
pub fn sync_ref_subscription(input: &mut InputSlot, arena: &mut TsArena, notifier: Notifier) {
    let Some(endpoint) = input.link.target else {
        return;
    };
    if arena[endpoint].meta().kind() != TsKind::Ref {
        return;
    }
    let current = ref_target(arena, endpoint);
    if current == input.ref_target {
        return;
    }
    if let Some(previous) = input.ref_target.take() {
        arena[previous].observers_mut().remove_observer(notifier);
    }
    if let Some(target) = current {
        if input.active {
            arena[target].observers_mut().add_observer(notifier);
        }
        input.ref_target = Some(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::time::EngineTime;
    use crate::ts::output::TsOutputView;
    use crate::ts::value::{alloc_endpoint, ViewData};
    use crate::ts::view::TsView;
    use crate::types::{TsMeta, TypeMeta};

    #[test]
    fn rebinding_samples_as_modified() {
        let scalar = TsMeta::ts(TypeMeta::int());
        let ref_meta = TsMeta::reference(scalar);
        let mut arena = TsArena::new();
        let mut sink = Vec::new();

        let first = alloc_endpoint(&mut arena, scalar, None);
        let second = alloc_endpoint(&mut arena, scalar, None);
        let reference = alloc_endpoint(&mut arena, ref_meta, None);

        let t0 = EngineTime::from_secs(0);
        TsOutputView::new(&mut arena, &mut sink, t0, ViewData::root(first))
            .set_value(Value::Int(5))
            .unwrap();
        TsOutputView::new(&mut arena, &mut sink, t0, ViewData::root(second))
            .set_value(Value::Int(5))
            .unwrap();
        TsOutputView::new(&mut arena, &mut sink, t0, ViewData::root(reference))
            .set_ref(TsRef(first))
            .unwrap();

        let t2 = EngineTime::from_secs(2);
        TsOutputView::new(&mut arena, &mut sink, t2, ViewData::root(reference))
            .set_ref(TsRef(second))
            .unwrap();

        // Value through the reference is unchanged, yet the retarget samples
        // through as a modification at t2.
        let through = TsView::new(&arena, ViewData::root(reference)).deref().unwrap();
        assert_eq!(through.value().unwrap(), Value::Int(5));
        assert!(through.modified(t2).unwrap());
        assert_eq!(through.last_modified_time().unwrap(), t2);
    }

    #[test]
    fn subscription_follows_retarget() {
        let scalar = TsMeta::ts(TypeMeta::int());
        let ref_meta = TsMeta::reference(scalar);
        let mut arena = TsArena::new();
        let mut sink = Vec::new();

        let first = alloc_endpoint(&mut arena, scalar, None);
        let second = alloc_endpoint(&mut arena, scalar, None);
        let reference = alloc_endpoint(&mut arena, ref_meta, None);
        TsOutputView::new(&mut arena, &mut sink, EngineTime::from_secs(0), ViewData::root(reference))
            .set_ref(TsRef(first))
            .unwrap();

        let notifier = Notifier {
            node: NodeId::from_raw(7),
        };
        let mut input = InputSlot::new("in", ref_meta, true);
        input.active = true;
        input.bind_output(&mut arena, reference, notifier).unwrap();
        assert_eq!(arena[first].observers().len(), 1);
        assert_eq!(arena[second].observers().len(), 0);

        TsOutputView::new(&mut arena, &mut sink, EngineTime::from_secs(1), ViewData::root(reference))
            .set_ref(TsRef(second))
            .unwrap();
        sync_ref_subscription(&mut input, &mut arena, notifier);
        assert_eq!(arena[first].observers().len(), 0);
        assert_eq!(arena[second].observers().len(), 1);
    }
}
