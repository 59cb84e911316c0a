use crate::simulation::{Action, NodeState};
use crate::tree::node::{Node, NodeRef};
use std::sync::atomic::Ordering;
use std::sync::Arc;

impl<A: Action, S: NodeState> Node<A, S> {
    /// A node is fully explored once it failed, or once it has no untried actions left and all
    /// of its children are fully explored.
    pub fn is_fully_explored(&self) -> bool {
        self.fully_explored.load(Ordering::SeqCst)
    }

    /// Re-evaluates this node and then its ancestors, stopping at the first one that is not
    /// fully explored. Only ever sets the flag.
    pub fn propagate_fully_explored_status(&self) {
        if !self.mark_if_fully_explored() {
            return;
        }
        let mut next = self.parent();
        while let Some(node) = next {
            if !node.mark_if_fully_explored() {
                break;
            }
            next = node.parent();
        }
    }

    fn mark_if_fully_explored(&self) -> bool {
        // Untried before children: a child is listed before its action leaves the untried set.
        let explored = self.is_failed()
            || (self.untried_action_count() == 0
                && self
                    .children
                    .read()
                    .iter()
                    .all(|c| c.is_fully_explored()));
        if explored {
            self.fully_explored.store(true, Ordering::SeqCst);
        }
        explored
    }

    /// Recomputes the flags of this whole subtree from scratch, clearing them on the way to
    /// this node's ancestors too. Needed after nodes were grafted below a node that was already
    /// considered fully explored. Failed nodes keep their flag.
    pub fn propagate_fully_explored_complete(self: &Arc<Self>) {
        let leaves = self.leaves();
        for leaf in &leaves {
            let mut current = leaf.clone();
            loop {
                current.reopen();
                if current.tree_depth() <= self.tree_depth() {
                    break;
                }
                match current.parent() {
                    Some(p) => current = p,
                    None => break,
                }
            }
        }
        let mut above = self.parent();
        while let Some(node) = above {
            node.reopen();
            above = node.parent();
        }
        for leaf in &leaves {
            leaf.propagate_fully_explored_status();
        }
    }

    fn reopen(&self) {
        if !self.is_failed() {
            self.fully_explored.store(false, Ordering::SeqCst);
        }
    }

    /// Drops untried actions from every non-leaf node down to `max_depth`. Useful for pruning
    /// an imported tree to the branches already present.
    pub fn strip_untried_actions_except_on_leaves(self: &Arc<Self>, max_depth: u32) {
        let mut touched: Vec<NodeRef<A, S>> = vec![];
        self.visit_below(|n| {
            if n.tree_depth() <= max_depth && n.child_count() > 0 {
                let mut untried = n.untried.lock();
                if !untried.is_empty() {
                    untried.clear();
                    touched.push(n.clone());
                }
            }
        });
        // Deepest first so ancestors see their children's flags.
        touched.sort_by_key(|n| std::cmp::Reverse(n.tree_depth()));
        for n in touched {
            n.propagate_fully_explored_status();
        }
    }

    /// Destroys all descendants and marks this node fully explored, so nothing comes back here.
    pub fn destroy_nodes_below_and_check_explored(&self) {
        self.destroy_nodes_below();
        self.untried.lock().clear();
        self.propagate_fully_explored_status();
    }
}

#[cfg(test)]
mod tests {
    use crate::simulation::fixtures::Flag;
    use crate::simulation::FixedActions;
    use crate::tree::{Node, NodeRef};
    use std::sync::Arc;

    fn two_action_root() -> NodeRef<u8, Flag> {
        Node::new_root(Flag(false), Arc::new(FixedActions::new(vec![0u8, 1])))
    }

    #[test]
    fn failure_marks_fully_explored() {
        let root = two_action_root();
        let dead = root.add_child(0).unwrap();
        dead.set_state(Flag(true)).unwrap();
        assert!(dead.is_failed() && dead.is_fully_explored());
        assert!(!root.is_fully_explored());
    }

    // root -> {a ok, b failed}; a -> {c failed, d failed}
    #[test]
    fn three_levels_close_bottom_up() {
        let root = two_action_root();
        let a = root.add_child_with_state(0, Flag(false)).unwrap();
        let b = root.add_child(1).unwrap();
        b.set_state(Flag(true)).unwrap();
        assert!(b.is_fully_explored());
        assert!(!a.is_fully_explored());
        assert!(!root.is_fully_explored());

        let c = a.add_child(0).unwrap();
        c.set_state(Flag(true)).unwrap();
        assert!(!a.is_fully_explored());
        assert!(!root.is_fully_explored());

        let d = a.add_child(1).unwrap();
        d.set_state(Flag(true)).unwrap();
        assert!(a.is_fully_explored());
        assert!(root.is_fully_explored());
    }

    // root -> {a, b, c}; only a's children exist and all of them failed.
    #[test]
    fn failed_grandchildren_close_only_their_branch() {
        let root: NodeRef<u8, Flag> =
            Node::new_root(Flag(false), Arc::new(FixedActions::new(vec![0u8, 1, 2])));
        let a = root.add_child_with_state(0, Flag(false)).unwrap();
        let b = root.add_child_with_state(1, Flag(false)).unwrap();
        let c = root.add_child_with_state(2, Flag(false)).unwrap();
        for action in 0..3 {
            let g = a.add_child(action).unwrap();
            assert!(!a.is_fully_explored());
            g.set_state(Flag(true)).unwrap();
        }
        assert!(a.is_fully_explored());
        assert!(!b.is_fully_explored());
        assert!(!c.is_fully_explored());
        assert!(!root.is_fully_explored());
        assert_eq!(root.untried_action_count(), 0);
    }

    fn closed() -> Arc<FixedActions<u8>> {
        Arc::new(FixedActions::new(vec![]))
    }

    fn open() -> Arc<FixedActions<u8>> {
        Arc::new(FixedActions::new(vec![5u8]))
    }

    #[test]
    fn complete_reconciliation_reopens_grafted_branches() {
        let root = two_action_root();
        let a = root
            .add_child_with_generator(0, Some(Flag(false)), closed())
            .unwrap();
        a.propagate_fully_explored_status();
        let b = root.add_child_with_state(1, Flag(true)).unwrap();
        assert!(a.is_fully_explored());
        assert!(root.is_fully_explored());

        // Grafted below a finished subtree; the lite propagation never clears flags.
        let fresh = a
            .add_child_with_generator(3, Some(Flag(false)), open())
            .unwrap();
        assert!(root.is_fully_explored());

        root.propagate_fully_explored_complete();
        assert!(b.is_fully_explored());
        assert!(!fresh.is_fully_explored());
        assert!(!a.is_fully_explored());
        assert!(!root.is_fully_explored());
    }

    #[test]
    fn complete_reconciliation_from_a_subtree_clears_ancestors() {
        let root = two_action_root();
        root.untried.lock().clear();
        let a = root
            .add_child_with_generator(0, Some(Flag(false)), closed())
            .unwrap();
        a.propagate_fully_explored_status();
        assert!(root.is_fully_explored());

        a.add_child_with_generator(1, Some(Flag(false)), open())
            .unwrap();
        a.propagate_fully_explored_complete();
        assert!(!a.is_fully_explored());
        assert!(!root.is_fully_explored());
    }

    #[test]
    fn stripping_untried_actions_closes_inner_nodes() {
        let root = two_action_root();
        let a = root.add_child_with_state(0, Flag(false)).unwrap();
        let leaf = a.add_child_with_state(0, Flag(true)).unwrap();
        assert!(leaf.is_fully_explored());
        assert!(!root.is_fully_explored());

        root.strip_untried_actions_except_on_leaves(10);
        assert_eq!(root.untried_action_count(), 0);
        assert_eq!(a.untried_action_count(), 0);
        assert!(a.is_fully_explored());
        assert!(root.is_fully_explored());
    }

    #[test]
    fn destroying_and_closing_a_branch() {
        let root = two_action_root();
        let a = root.add_child_with_state(0, Flag(false)).unwrap();
        a.add_child_with_state(1, Flag(false)).unwrap();
        root.add_child_with_state(1, Flag(true)).unwrap();
        a.destroy_nodes_below_and_check_explored();
        assert_eq!(a.child_count(), 0);
        assert!(a.is_fully_explored());
        assert!(root.is_fully_explored());
    }
}
