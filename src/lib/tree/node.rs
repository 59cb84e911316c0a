use crate::counters;
use crate::error::{Result, TreeError};
use crate::simulation::{Action, ActionGenerator, NodeState, NullGenerator};
use crate::tree::untried::UntriedActions;
use crate::tree::ValueUpdater;
use atomic_float::AtomicF32;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

pub type NodeRef<A, S> = Arc<Node<A, S>>;

#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) enum Origin {
    Explored,
    Imported,
}

/// A vertex of the shared search tree.
///
/// Parents own their children; children refer back to their parent weakly, so dropping the root
/// releases the whole tree. Children are only ever appended, the state is written at most once,
/// and the `fully_explored` flag is only cleared by [`Node::propagate_fully_explored_complete`].
pub struct Node<A, S> {
    parent: Option<Weak<Node<A, S>>>,
    action: Option<A>,
    state: OnceCell<S>,
    tree_depth: u32,
    linked: bool,
    is_failed: AtomicBool,
    generator: Arc<dyn ActionGenerator<A, S>>,

    pub(super) children: RwLock<Vec<NodeRef<A, S>>>,
    pub(super) untried: Mutex<UntriedActions<A>>,
    pub(super) fully_explored: AtomicBool,
    pub(super) lock_state: AtomicU8,
    // Serialises lock transitions of this node only.
    pub(super) rights: Mutex<()>,

    visit_count: AtomicU64,
    value: AtomicF32,
    value_guard: Mutex<()>,

    max_branch_depth: AtomicU32,
    descendants: AtomicUsize,
}

impl<A: Action, S: NodeState> Node<A, S> {
    pub fn new_root(state: S, generator: Arc<dyn ActionGenerator<A, S>>) -> NodeRef<A, S> {
        let root = Arc::new(Node::blank(None, None, 0, true, generator));
        root.install_state(state);
        root.seed_untried();
        counters::global().node_created();
        root
    }

    /// A root with no generator. Its children have to be added by hand or imported.
    pub fn new_root_without_actions(state: S) -> NodeRef<A, S> {
        Self::new_root(state, Arc::new(NullGenerator))
    }

    fn blank(
        parent: Option<Weak<Node<A, S>>>,
        action: Option<A>,
        tree_depth: u32,
        linked: bool,
        generator: Arc<dyn ActionGenerator<A, S>>,
    ) -> Self {
        Node {
            parent,
            action,
            state: OnceCell::new(),
            tree_depth,
            linked,
            is_failed: AtomicBool::new(false),
            generator,
            children: RwLock::new(vec![]),
            untried: Mutex::new(UntriedActions::empty()),
            fully_explored: AtomicBool::new(false),
            lock_state: AtomicU8::new(0),
            rights: Mutex::new(()),
            visit_count: AtomicU64::new(0),
            value: AtomicF32::new(0.0),
            value_guard: Mutex::new(()),
            max_branch_depth: AtomicU32::new(tree_depth),
            descendants: AtomicUsize::new(0),
        }
    }

    fn install_state(&self, state: S) -> bool {
        let failed = state.is_failed();
        // Fresh nodes only, so the cell is always empty here.
        let _ = self.state.set(state);
        if failed {
            self.is_failed.store(true, Ordering::SeqCst);
        }
        failed
    }

    fn seed_untried(&self) {
        if self.is_failed() {
            self.fully_explored.store(true, Ordering::SeqCst);
            return;
        }
        let candidates = self.generator.candidates(self);
        *self.untried.lock() = candidates;
    }

    /// Adds a provisional child: linked, state unknown until [`Node::set_state`].
    pub fn add_child(self: &Arc<Self>, action: A) -> Result<NodeRef<A, S>> {
        self.attach(action, None, None, true, Origin::Explored, false)
            .map(|(c, _)| c)
    }

    pub fn add_child_with_state(self: &Arc<Self>, action: A, state: S) -> Result<NodeRef<A, S>> {
        self.attach(action, Some(state), None, true, Origin::Explored, false)
            .map(|(c, _)| c)
    }

    /// Like [`Node::add_child_with_state`] but the child and its descendants draw their
    /// candidates from `generator` instead of this node's.
    pub fn add_child_with_generator(
        self: &Arc<Self>,
        action: A,
        state: Option<S>,
        generator: Arc<dyn ActionGenerator<A, S>>,
    ) -> Result<NodeRef<A, S>> {
        self.attach(action, state, Some(generator), true, Origin::Explored, false)
            .map(|(c, _)| c)
    }

    /// A child that knows its parent but is not listed among the parent's children, nor removed
    /// from its untried actions. Used for throwaway branches such as rollouts.
    pub fn add_unlinked_child(self: &Arc<Self>, action: A, state: Option<S>) -> Result<NodeRef<A, S>> {
        self.attach(action, state, None, false, Origin::Explored, false)
            .map(|(c, _)| c)
    }

    /// Unlinked child that may share its action with a linked sibling. Rollouts wander off the
    /// tree this way without ever touching it.
    pub(crate) fn add_rollout_child(self: &Arc<Self>, action: A, state: S) -> NodeRef<A, S> {
        let child = Arc::new(Node::blank(
            Some(Arc::downgrade(self)),
            Some(action),
            self.tree_depth + 1,
            false,
            self.generator.clone(),
        ));
        child.install_state(state);
        child.seed_untried();
        child
    }

    /// Returns the linked child for `action`, creating it with `state` if there is none. The flag
    /// is true when the child was created.
    pub(super) fn child_or_import(
        self: &Arc<Self>,
        action: A,
        state: S,
    ) -> Result<(NodeRef<A, S>, bool)> {
        self.attach(action, Some(state), None, true, Origin::Imported, true)
    }

    fn attach(
        self: &Arc<Self>,
        action: A,
        state: Option<S>,
        generator: Option<Arc<dyn ActionGenerator<A, S>>>,
        linked: bool,
        origin: Origin,
        reuse: bool,
    ) -> Result<(NodeRef<A, S>, bool)> {
        let depth = self.tree_depth + 1;
        if let Some(existing) = self.find_child(&action) {
            if reuse {
                return Ok((existing, false));
            }
            return Err(duplicate(depth, &action));
        }

        let generator = generator.unwrap_or_else(|| self.generator.clone());
        let child = Arc::new(Node::blank(
            Some(Arc::downgrade(self)),
            Some(action),
            depth,
            linked,
            generator,
        ));
        if let Some(state) = state {
            child.install_state(state);
        }
        child.seed_untried();

        if linked {
            let mut children = self.children.write();
            if let Some(existing) = children.iter().find(|c| c.action == child.action) {
                if reuse {
                    return Ok((existing.clone(), false));
                }
                return Err(duplicate(depth, child.action()?));
            }
            // Visible as a child before it stops being untried, so a concurrent observer never
            // sees this node with neither.
            children.push(child.clone());
            if let Some(a) = &child.action {
                self.untried.lock().remove(a);
            }
            drop(children);
            self.record_descendant(depth);
            // Dead ends are finished the moment they appear.
            if child.is_failed() || child.untried_action_count() == 0 {
                child.propagate_fully_explored_status();
            }
            match origin {
                Origin::Explored => counters::global().node_created(),
                Origin::Imported => counters::global().node_imported(),
            }
        }
        Ok((child, true))
    }

    fn record_descendant(&self, depth: u32) {
        self.descendants.fetch_add(1, Ordering::SeqCst);
        self.max_branch_depth.fetch_max(depth, Ordering::SeqCst);
        let mut next = self.parent();
        while let Some(node) = next {
            node.descendants.fetch_add(1, Ordering::SeqCst);
            node.max_branch_depth.fetch_max(depth, Ordering::SeqCst);
            next = node.parent();
        }
    }

    /// Assigns the state of a provisional node. A failed state empties the untried actions and,
    /// on linked nodes, propagates the fully explored status upwards.
    pub fn set_state(&self, state: S) -> Result<()> {
        let failed = state.is_failed();
        self.state
            .set(state)
            .map_err(|_| TreeError::StateAlreadyAssigned {
                depth: self.tree_depth,
            })?;
        if failed {
            self.is_failed.store(true, Ordering::SeqCst);
            self.untried.lock().clear();
            if self.linked {
                self.propagate_fully_explored_status();
            } else {
                self.fully_explored.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    pub fn state(&self) -> Result<&S> {
        self.state.get().ok_or(TreeError::StateUnavailable {
            depth: self.tree_depth,
        })
    }

    pub fn has_state(&self) -> bool {
        self.state.get().is_some()
    }

    /// Polls for the state of a provisional node a bounded number of times.
    pub fn wait_for_state(&self, polls: u32, interval: Duration) -> Result<&S> {
        for _ in 0..polls {
            if let Some(s) = self.state.get() {
                return Ok(s);
            }
            thread::sleep(interval);
        }
        self.state.get().ok_or(TreeError::StateTimeout {
            depth: self.tree_depth,
            polls,
        })
    }

    pub fn action(&self) -> Result<&A> {
        self.action.as_ref().ok_or(TreeError::RootHasNoAction)
    }

    /// Actions leading from the root to this node, root side first.
    pub fn sequence(&self) -> Result<Vec<A>> {
        let mut sequence = Vec::with_capacity(self.tree_depth as usize);
        sequence.push(self.action()?.clone());
        let mut next = self.parent();
        while let Some(node) = next {
            if let Some(a) = &node.action {
                sequence.push(a.clone());
            }
            next = node.parent();
        }
        sequence.reverse();
        Ok(sequence)
    }

    pub fn parent(&self) -> Option<NodeRef<A, S>> {
        self.parent.as_ref().and_then(|p| p.upgrade())
    }

    pub fn tree_depth(&self) -> u32 {
        self.tree_depth
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn is_failed(&self) -> bool {
        self.is_failed.load(Ordering::SeqCst)
    }

    pub fn generator(&self) -> &Arc<dyn ActionGenerator<A, S>> {
        &self.generator
    }

    pub fn untried_action_count(&self) -> usize {
        self.untried.lock().len()
    }

    pub fn untried_actions(&self) -> Vec<A> {
        self.untried.lock().to_vec()
    }

    pub fn untried_action_by_index(&self, index: usize) -> Option<A> {
        self.untried.lock().get(index).cloned()
    }

    pub fn untried_action_random<R: Rng>(&self, rng: &mut R) -> Option<A> {
        self.untried.lock().random(rng).cloned()
    }

    pub fn untried_action_on_distribution<R: Rng>(&self, rng: &mut R) -> Option<A> {
        self.untried.lock().on_distribution(rng).cloned()
    }

    pub fn children(&self) -> Vec<NodeRef<A, S>> {
        self.children.read().clone()
    }

    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    pub fn child_by_index(&self, index: usize) -> Option<NodeRef<A, S>> {
        self.children.read().get(index).cloned()
    }

    pub fn random_child<R: Rng>(&self, rng: &mut R) -> Option<NodeRef<A, S>> {
        self.children.read().choose(rng).cloned()
    }

    pub fn find_child(&self, action: &A) -> Option<NodeRef<A, S>> {
        self.children
            .read()
            .iter()
            .find(|c| c.action.as_ref() == Some(action))
            .cloned()
    }

    pub fn sibling_count(&self) -> usize {
        self.parent()
            .map(|p| p.child_count().saturating_sub(1))
            .unwrap_or(0)
    }

    /// Position among the parent's children. None for the root, unlinked nodes and nodes whose
    /// parent is gone.
    pub fn index_in_parent(&self) -> Option<usize> {
        if !self.linked {
            return None;
        }
        let action = self.action.as_ref()?;
        let parent = self.parent()?;
        let children = parent.children.read();
        children.iter().position(|c| c.action.as_ref() == Some(action))
    }

    pub fn root(self: &Arc<Self>) -> NodeRef<A, S> {
        let mut current = self.clone();
        while let Some(p) = current.parent() {
            current = p;
        }
        current
    }

    /// True if `self` lies strictly above `other`.
    pub fn is_ancestor(&self, other: &Node<A, S>) -> bool {
        let mut next = other.parent();
        while let Some(node) = next {
            if node.tree_depth < self.tree_depth {
                return false;
            }
            if std::ptr::eq(node.as_ref(), self) {
                return true;
            }
            next = node.parent();
        }
        false
    }

    pub fn is_ancestor_or_self(&self, other: &Node<A, S>) -> bool {
        std::ptr::eq(self, other) || self.is_ancestor(other)
    }

    /// Visits this node and every linked node below it, parents before children.
    pub fn visit_below<F: FnMut(&NodeRef<A, S>)>(self: &Arc<Self>, mut f: F) {
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            f(&node);
            let children = node.children.read();
            stack.extend(children.iter().rev().cloned());
        }
    }

    /// Every node below this one, inclusive.
    pub fn nodes_below(self: &Arc<Self>) -> Vec<NodeRef<A, S>> {
        let mut nodes = vec![];
        self.visit_below(|n| nodes.push(n.clone()));
        nodes
    }

    /// Nodes below this one without children. A childless node is its own only leaf.
    pub fn leaves(self: &Arc<Self>) -> Vec<NodeRef<A, S>> {
        let mut leaves = vec![];
        self.visit_below(|n| {
            if n.child_count() == 0 {
                leaves.push(n.clone())
            }
        });
        leaves
    }

    /// Walks the subtree. Compare with the cached [`Node::descendant_count`].
    pub fn count_descendants(self: &Arc<Self>) -> usize {
        let mut count = 0;
        self.visit_below(|_| count += 1);
        count - 1
    }

    pub fn descendant_count(&self) -> usize {
        self.descendants.load(Ordering::SeqCst)
    }

    /// Deepest tree depth any linked descendant has reached, or this node's own depth.
    pub fn max_branch_depth(&self) -> u32 {
        self.max_branch_depth.load(Ordering::SeqCst)
    }

    /// Detaches every descendant. Callers must make sure no worker is still exploring below.
    pub fn destroy_nodes_below(&self) {
        let removed = std::mem::take(&mut *self.children.write());
        let count: usize = removed.iter().map(|c| c.descendant_count() + 1).sum();
        let mut stack = removed;
        while let Some(node) = stack.pop() {
            let mut grandchildren = std::mem::take(&mut *node.children.write());
            node.descendants.store(0, Ordering::SeqCst);
            stack.append(&mut grandchildren);
        }
        self.max_branch_depth
            .store(self.tree_depth, Ordering::SeqCst);
        forget_descendants(&self.descendants, count);
        let mut next = self.parent();
        while let Some(node) = next {
            forget_descendants(&node.descendants, count);
            next = node.parent();
        }
    }

    pub fn visit_count(&self) -> u64 {
        self.visit_count.load(Ordering::SeqCst)
    }

    pub fn value(&self) -> f32 {
        self.value.load(Ordering::SeqCst)
    }

    /// Folds `sample` into the value and counts a visit.
    pub fn update_value(&self, sample: f32, updater: &dyn ValueUpdater) {
        let _guard = self.value_guard.lock();
        let visits = self.visit_count.load(Ordering::SeqCst) + 1;
        let updated = updater.update(self.value.load(Ordering::SeqCst), sample, visits);
        self.value.store(updated, Ordering::SeqCst);
        self.visit_count.store(visits, Ordering::SeqCst);
    }

    pub fn set_value(&self, value: f32) {
        let _guard = self.value_guard.lock();
        self.value.store(value, Ordering::SeqCst);
    }
}

fn duplicate<A: Debug>(depth: u32, action: &A) -> TreeError {
    TreeError::DuplicateAction {
        depth,
        action: format!("{:?}", action),
    }
}

fn forget_descendants(counter: &AtomicUsize, count: usize) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
        Some(c.saturating_sub(count))
    });
}

impl<A: Debug, S> Debug for Node<A, S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("depth", &self.tree_depth)
            .field("action", &self.action)
            .field("failed", &self.is_failed.load(Ordering::SeqCst))
            .field(
                "fully_explored",
                &self.fully_explored.load(Ordering::SeqCst),
            )
            .field("lock", &self.lock_state.load(Ordering::SeqCst))
            .field("children", &self.children.read().len())
            .field("visits", &self.visit_count.load(Ordering::SeqCst))
            .finish()
    }
}
