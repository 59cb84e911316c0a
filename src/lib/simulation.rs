use crate::tree::{Node, UntriedActions};
use std::collections::BTreeMap;
use std::fmt::Debug;

pub mod corridor;
pub mod graph_walk;

/// Anything that can label an edge of the search tree. Two actions are the same move iff they
/// compare equal.
pub trait Action: Clone + PartialEq + Debug + Send + Sync + 'static {}
impl<T> Action for T where T: Clone + PartialEq + Debug + Send + Sync + 'static {}

/// Opaque payload produced by a [`Simulator`]. The tree only ever asks whether it is terminal.
pub trait NodeState: Clone + Debug + Send + Sync + 'static {
    fn is_failed(&self) -> bool;
}

/// A stateful simulation stepped one discrete tick at a time. Every worker owns exactly one,
/// constructed independently of every other worker's instance.
pub trait Simulator<A, S>: Send {
    fn reset_world(&mut self);

    /// Advances one tick applying `action`. Stepping a failed simulation is a no-op.
    fn step(&mut self, action: &A);

    fn current_state(&self) -> S;
    fn is_failed(&self) -> bool;
    fn timesteps_this_episode(&self) -> u64;
}

/// Seeds the untried actions of a node. Called once per node construction, and must be a pure
/// function of the node (its depth, action sequence or state).
pub trait ActionGenerator<A, S>: Send + Sync {
    fn candidates(&self, node: &Node<A, S>) -> UntriedActions<A>;
}

/// Generates nothing. Nodes built with it are only ever extended by hand or by import.
pub struct NullGenerator;

impl<A: Action, S> ActionGenerator<A, S> for NullGenerator {
    fn candidates(&self, _: &Node<A, S>) -> UntriedActions<A> {
        UntriedActions::empty()
    }
}

/// The same candidate set at every node.
pub struct FixedActions<A> {
    actions: UntriedActions<A>,
}

impl<A: Action> FixedActions<A> {
    pub fn new(actions: Vec<A>) -> Self {
        FixedActions {
            actions: UntriedActions::uniform(actions),
        }
    }

    pub fn weighted(actions: Vec<(A, f32)>) -> Self {
        FixedActions {
            actions: UntriedActions::weighted(actions),
        }
    }
}

impl<A: Action, S> ActionGenerator<A, S> for FixedActions<A> {
    fn candidates(&self, _: &Node<A, S>) -> UntriedActions<A> {
        self.actions.clone()
    }
}

/// Cycles through a list of candidate sets by tree depth. Exceptions override the cycle at
/// specific depths, which is handy for a different opening.
pub struct FixedSequence<A> {
    repeated: Vec<UntriedActions<A>>,
    exceptions: BTreeMap<u32, UntriedActions<A>>,
}

impl<A: Action> FixedSequence<A> {
    pub fn new(repeated: Vec<UntriedActions<A>>) -> Self {
        FixedSequence {
            repeated,
            exceptions: BTreeMap::new(),
        }
    }

    pub fn with_exception(mut self, depth: u32, actions: UntriedActions<A>) -> Self {
        self.exceptions.insert(depth, actions);
        self
    }

    pub fn cycle_length(&self) -> usize {
        self.repeated.len()
    }
}

impl<A: Action, S: NodeState> ActionGenerator<A, S> for FixedSequence<A> {
    fn candidates(&self, node: &Node<A, S>) -> UntriedActions<A> {
        let depth = node.tree_depth();
        if let Some(exception) = self.exceptions.get(&depth) {
            return exception.clone();
        }
        if self.repeated.is_empty() {
            return UntriedActions::empty();
        }
        self.repeated[depth as usize % self.repeated.len()].clone()
    }
}

/// Adapts a closure into a generator.
pub struct FnGenerator<F>(pub F);

impl<A, S, F> ActionGenerator<A, S> for FnGenerator<F>
where
    F: Fn(&Node<A, S>) -> UntriedActions<A> + Send + Sync,
{
    fn candidates(&self, node: &Node<A, S>) -> UntriedActions<A> {
        (self.0)(node)
    }
}
