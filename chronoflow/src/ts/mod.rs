//! Time-series storage, views, observers, and binding.
//!
//! Every time-series endpoint of a graph is a [`TsValue`] slot in the graph's
//! arena, holding the five parallel concerns of the model: value, last
//! modification time, observer list, tick-scoped delta, and (for inputs) the
//! link to a bound output. Reads and writes go through [`TsView`] /
//! [`TsOutputView`] wrappers that dispatch on the endpoint's interned
//! [`TsMeta`](crate::types::TsMeta), never on concrete value types.

pub mod input;
pub mod observer;
pub mod output;
pub mod reference;
pub mod value;
pub mod view;

use smallvec::SmallVec;

use crate::arena::{Idx, SlotVec};

/// Tag for time-series arena indices.
pub enum TsTag {}

/// Index of a time-series endpoint within its graph's arena.
pub type TsId = Idx<TsTag>;

/// A small node-relative index path addressing a nested endpoint.
pub type ShortPath = SmallVec<[u16; 4]>;

/// The per-graph arena of time-series endpoints.
pub type TsArena = SlotVec<TsTag, value::TsValue>;

pub use input::{InputSlot, LinkTarget};
pub use observer::{ActivationSink, Notifier, ObserverArray, ObserverList};
pub use output::TsOutputView;
pub use value::{
    alloc_endpoint, resolve, subscribe_slot, unsubscribe_slot, Delta, DictStore, ResolvedSlot,
    SetStore, TsStore, TsValue, ViewData, WindowStore,
};
pub use view::TsView;
