//! Input endpoints: binding, peering, and activation.

use crate::error::{EngineError, Result};
use crate::types::{TsKind, TsMeta, TsRef, Value};

use super::observer::Notifier;
use super::value::{TsStore, ViewData};
use super::view::TsView;
use super::{TsArena, TsId};

/// The link half of an input: a copy of the bound output's target data.
///
/// Structural state (activation, the owning node's notifier, REF-tracking)
/// stays on the [`InputSlot`]; unbinding clears only the link.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkTarget {
    /// The bound output endpoint, if any.
    pub target: Option<TsId>,
    /// True when the input aliases the output's storage outright.
    pub peered: bool,
}

/// One named input of a node.
#[derive(Debug)]
pub struct InputSlot {
    /// Input name from the node signature.
    pub name: String,
    /// Declared meta; binding checks the output against it.
    pub meta: &'static TsMeta,
    /// The bound output's target data.
    pub link: LinkTarget,
    /// Local REF storage, allocated only for REF inputs bound to plain
    /// outputs of the target meta.
    pub own: Option<TsId>,
    /// Only active inputs cause node activation.
    pub active: bool,
    /// Whether the signature declared the input active.
    pub default_active: bool,
    /// The target currently subscribed through a REF, kept in step as the
    /// reference retargets.
    pub(crate) ref_target: Option<TsId>,
}

impl InputSlot {
    /// A fresh, unbound input.
    pub fn new(name: impl Into<String>, meta: &'static TsMeta, default_active: bool) -> Self {
        InputSlot {
            name: name.into(),
            meta,
            link: LinkTarget::default(),
            own: None,
            active: false,
            default_active,
            ref_target: None,
        }
    }

    /// Binds this input to `output`.
    ///
    /// Identical metas peer the input over the output's storage. A REF input
    /// whose target meta matches the output instead materializes a local
    /// reference slot pointing at it. Anything else is a wiring bug.
    pub fn bind_output(&mut self, arena: &mut TsArena, output: TsId, notifier: Notifier) -> Result<()> {
        let output_meta = arena[output].meta();
        if std::ptr::eq(output_meta, self.meta) {
            self.link = LinkTarget {
                target: Some(output),
                peered: true,
            };
        } else if self.meta.kind() == TsKind::Ref
            && self.meta.target().is_some_and(|t| std::ptr::eq(t, output_meta))
        {
            let own = match self.own {
                Some(own) => own,
                None => {
                    let own = super::value::alloc_endpoint(arena, self.meta, None);
                    self.own = Some(own);
                    own
                }
            };
            if let TsStore::Scalar(value) = &mut arena[own].store {
                *value = Value::Ref(TsRef(output));
            }
            self.link = LinkTarget {
                target: Some(own),
                peered: false,
            };
        } else {
            return Err(EngineError::TypeMismatch {
                src: output_meta.name().to_owned(),
                dst: self.meta.name().to_owned(),
            });
        }
        if self.active {
            self.subscribe(arena, notifier);
        }
        Ok(())
    }

    /// Drops the link, removing any observer registration first.
    pub fn un_bind_output(&mut self, arena: &mut TsArena, notifier: Notifier) {
        self.unsubscribe(arena, notifier);
        self.link = LinkTarget::default();
        self.ref_target = None;
    }

    /// Activates the input: modifications of the bound output now schedule
    /// the owning node.
    pub fn make_active(&mut self, arena: &mut TsArena, notifier: Notifier) {
        if !self.active {
            self.active = true;
            self.subscribe(arena, notifier);
        }
    }

    /// Deactivates the input.
    pub fn make_passive(&mut self, arena: &mut TsArena, notifier: Notifier) {
        if self.active {
            self.unsubscribe(arena, notifier);
            self.active = false;
        }
    }

    /// The endpoint reads go through.
    pub fn endpoint(&self) -> Result<TsId> {
        self.link
            .target
            .ok_or_else(|| EngineError::NotBound(self.name.clone()))
    }

    /// A read view over the bound endpoint.
    pub fn view<'a>(&self, arena: &'a TsArena) -> Result<TsView<'a>> {
        Ok(TsView::new(arena, ViewData::root(self.endpoint()?)))
    }

    /// True when the bound endpoint is a reference kind.
    pub fn is_reference(&self, arena: &TsArena) -> bool {
        self.link
            .target
            .is_some_and(|ts| arena[ts].meta().kind() == TsKind::Ref)
    }

    fn subscribe(&mut self, arena: &mut TsArena, notifier: Notifier) {
        if let Some(target) = self.link.target {
            arena[target].observers_mut().add_observer(notifier);
        }
        super::reference::sync_ref_subscription(self, arena, notifier);
    }

    fn unsubscribe(&mut self, arena: &mut TsArena, notifier: Notifier) {
        if let Some(target) = self.link.target {
            arena[target].observers_mut().remove_observer(notifier);
        }
        if let Some(previous) = self.ref_target.take() {
            arena[previous].observers_mut().remove_observer(notifier);
        }
    }
}
