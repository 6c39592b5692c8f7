//! The mesh node: a keyed family with dynamic dependency ranking.

use std::cell::RefCell;
use std::rc::Rc;

use itertools::Itertools;

use crate::builder::MapSpec;
use crate::error::{EngineError, Result};
use crate::graph::{EvalContext, Graph};
use crate::node::NodeBody;
use crate::types::Value;

use super::KeyedFamily;

/// The dependency DAG of a mesh: which key's graph depends on which.
#[derive(Default)]
struct MeshState {
    /// `(dependent, dependency)` edges.
    edges: Vec<(Value, Value)>,
    /// Longest-path rank per key; absent keys rank 0.
    ranks: Vec<(Value, usize)>,
}

impl MeshState {
    fn rank_of(&self, key: &Value) -> usize {
        self.ranks
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map_or(0, |(_, rank)| *rank)
    }

    fn set_rank(&mut self, key: &Value, rank: usize) {
        match self.ranks.iter_mut().find(|(candidate, _)| candidate == key) {
            Some(entry) => entry.1 = rank,
            None => self.ranks.push((key.clone(), rank)),
        }
    }

    /// Recomputes every rank as the longest dependency path. Bellman-Ford
    /// style relaxation: more rounds than keys means a cycle.
    fn rerank(&mut self) -> std::result::Result<(), Value> {
        let keys: Vec<Value> = self
            .edges
            .iter()
            .flat_map(|(a, b)| [a.clone(), b.clone()])
            .collect();
        let mut distinct: Vec<Value> = Vec::new();
        for key in keys {
            if !distinct.contains(&key) {
                distinct.push(key);
            }
        }
        for (_, rank) in &mut self.ranks {
            *rank = 0;
        }
        let bound = distinct.len();
        for round in 0..=bound {
            let mut changed = None;
            for (dependent, dependency) in self.edges.clone() {
                let required = self.rank_of(&dependency) + 1;
                if self.rank_of(&dependent) < required {
                    self.set_rank(&dependent, required);
                    changed = Some(dependent);
                }
            }
            match changed {
                None => return Ok(()),
                Some(key) if round == bound => return Err(key),
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// A shared handle through which child graphs (or the host) declare that the
/// graph of one key depends on the graph of another.
#[derive(Clone, Default)]
pub struct MeshHandle {
    state: Rc<RefCell<MeshState>>,
}

impl MeshHandle {
    /// Declares "the graph for `dependent` depends on the graph for
    /// `dependency`" and re-ranks. Fails with `DependencyCycle` — leaving
    /// the previous DAG intact — when the edge would close a cycle.
    pub fn declare_dependency(&self, dependent: Value, dependency: Value) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let edge = (dependent, dependency);
        if state.edges.contains(&edge) {
            return Ok(());
        }
        state.edges.push(edge);
        if let Err(key) = state.rerank() {
            state.edges.pop();
            state
                .rerank()
                .expect("previous DAG re-ranks after removing the new edge");
            return Err(EngineError::DependencyCycle {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// The current rank of a key's graph: the longest dependency path
    /// below it.
    pub fn rank(&self, key: &Value) -> usize {
        self.state.borrow().rank_of(key)
    }
}

/// A map node whose children additionally declare dependencies on one
/// another and evaluate in rank order within a tick: rank 0 first.
pub struct MeshNode {
    family: KeyedFamily,
    handle: MeshHandle,
}

impl MeshNode {
    /// A mesh node over the given keyed wiring.
    pub fn new(spec: MapSpec) -> Self {
        MeshNode {
            family: KeyedFamily::new(spec),
            handle: MeshHandle::default(),
        }
    }

    /// The dependency handle of this mesh.
    pub fn handle(&self) -> MeshHandle {
        self.handle.clone()
    }

    fn rank_order(&self, mut order: Vec<usize>) -> Vec<usize> {
        order.sort_by_key(|&position| {
            (
                self.handle.rank(&self.family.members[position].key),
                position,
            )
        });
        order
    }
}

impl NodeBody for MeshNode {
    fn start(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        // Publish the handle so child graphs and the host can declare
        // dependencies; the trait key carries the node name.
        let trait_key = format!("mesh.{}", cx.core.nodes[cx.node].name);
        cx.core
            .traits
            .set(trait_key, Rc::new(self.handle.clone()));
        Ok(())
    }

    fn eval(&mut self, cx: &mut EvalContext<'_>) -> Result<()> {
        // Children whose projections changed or whose own work is due,
        // rank 0 first.
        let touched = self.family.reconcile(cx)?;
        let due = self.family.due_members(cx.now())?;
        let order = self.rank_order(touched.into_iter().chain(due).sorted().dedup().collect());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_follow_longest_path() {
        let handle = MeshHandle::default();
        let (a, b, c) = (Value::from("A"), Value::from("B"), Value::from("C"));

        handle.declare_dependency(b.clone(), a.clone()).unwrap();
        handle.declare_dependency(c.clone(), b.clone()).unwrap();
        assert_eq!(handle.rank(&a), 0);
        assert_eq!(handle.rank(&b), 1);
        assert_eq!(handle.rank(&c), 2);

        // Closing the loop must fail and leave ranks untouched.
        let err = handle.declare_dependency(a.clone(), c.clone()).unwrap_err();
        assert!(matches!(err, EngineError::DependencyCycle { .. }));
        assert_eq!(handle.rank(&a), 0);
        assert_eq!(handle.rank(&b), 1);
        assert_eq!(handle.rank(&c), 2);
    }

    #[test]
    fn rerank_never_undercuts_dependencies() {
        let handle = MeshHandle::default();
        let (a, b, c, d) = (
            Value::from("a"),
            Value::from("b"),
            Value::from("c"),
            Value::from("d"),
        );
        handle.declare_dependency(d.clone(), c.clone()).unwrap();
        handle.declare_dependency(c.clone(), a.clone()).unwrap();
        handle.declare_dependency(d.clone(), a.clone()).unwrap();
        handle.declare_dependency(b.clone(), a.clone()).unwrap();
        handle.declare_dependency(c.clone(), b.clone()).unwrap();

        // rank(c) = 1 + max(rank(a), rank(b)) and rank(d) follows suit.
        assert_eq!(handle.rank(&a), 0);
        assert_eq!(handle.rank(&b), 1);
        assert_eq!(handle.rank(&c), 2);
        assert_eq!(handle.rank(&d), 3);
    }
}
