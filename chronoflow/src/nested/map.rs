//! The map node: one child graph per key of a dict input.

use itertools::Itertools;

use crate::builder::MapSpec;
use crate::error::Result;
use crate::graph::{EvalContext, Graph};
use crate::node::NodeBody;

use super::KeyedFamily;

/// Maintains one child graph per key in its keyed TSD input. Keys added to
/// the dict build a child (which receives the key through a stub source);
/// removed keys tear theirs down. Child outputs project into the node's
/// keyed output.
pub struct MapNode {
    family: KeyedFamily,
}

impl MapNode {
    /// A map node over the given keyed wiring.
    pub fn new(spec: MapSpec) -> Self {
        MapNode {
            family: KeyedFamily::new(spec),
        }
    }
}

impl NodeBody for MapNode {
    fn eval(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        // Drive the children whose projections changed this tick plus those
        // with their own work due at it; everyone else stays untouched.
        let touched = self.family.reconcile(cx)?;
        let due = self.family.due_members(cx.now())?;
        let order: Vec<usize> = touched.into_iter().chain(due).sorted().dedup().collect();
        self.family.drive(cx, order)?;
        self.family.reschedule(cx)
    }

    fn stop(&mut self, _cx: &mut EvalContext<'_>) -> Result<()> {
        self.family.shutdown_all()
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Graph)) {
        self.family.visit(visit);
    }
}
