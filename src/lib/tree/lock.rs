use crate::simulation::{Action, NodeState};
use crate::tree::node::Node;
use log::trace;
use std::sync::atomic::Ordering;

const UNLOCKED: u8 = 0;
// Held by a worker expanding below the node.
const RESERVED: u8 = 1;
// Set because no child or untried action below was left to claim.
const CASCADED: u8 = 2;

/// Expansion rights.
///
/// A worker reserves a node before expanding below it. When every way down from a node is
/// locked or finished, the node locks itself too, so tree policies stop descending into it.
/// Transitions of a node happen under its own guard only and the cascade runs strictly from
/// child to parent, so two workers can never wait on each other.
impl<A: Action, S: NodeState> Node<A, S> {
    pub fn is_locked(&self) -> bool {
        self.lock_state.load(Ordering::SeqCst) != UNLOCKED
    }

    /// Neither locked nor fully explored: a tree policy may still descend into it.
    pub fn is_viable(&self) -> bool {
        !self.is_locked() && !self.is_fully_explored()
    }

    /// Tries to claim the node for the calling worker. False if it is already locked, or
    /// fully explored and hence not worth claiming.
    pub fn reserve_expansion_rights(&self) -> bool {
        {
            let _guard = self.rights.lock();
            if self.is_locked() || self.is_fully_explored() {
                return false;
            }
            self.lock_state.store(RESERVED, Ordering::SeqCst);
        }
        trace!("reserved node at depth {}", self.tree_depth());
        let mut next = self.parent();
        while let Some(node) = next {
            if !node.cascade_lock() {
                break;
            }
            next = node.parent();
        }
        true
    }

    /// Unlocks the node and reopens every ancestor that was only locked because of it.
    pub fn release_expansion_rights(&self) {
        {
            let _guard = self.rights.lock();
            self.lock_state.store(UNLOCKED, Ordering::SeqCst);
        }
        trace!("released node at depth {}", self.tree_depth());
        let mut next = self.parent();
        while let Some(node) = next {
            if !node.cascade_unlock() {
                break;
            }
            next = node.parent();
        }
    }

    fn has_claimable_path(&self) -> bool {
        self.untried_action_count() > 0 || self.children.read().iter().any(|c| c.is_viable())
    }

    fn cascade_lock(&self) -> bool {
        let _guard = self.rights.lock();
        if self.is_locked() || self.has_claimable_path() {
            return false;
        }
        self.lock_state.store(CASCADED, Ordering::SeqCst);
        true
    }

    // Direct reservations belong to their worker; only cascaded locks are lifted here.
    fn cascade_unlock(&self) -> bool {
        let _guard = self.rights.lock();
        if self.lock_state.load(Ordering::SeqCst) != CASCADED || !self.has_claimable_path() {
            return false;
        }
        self.lock_state.store(UNLOCKED, Ordering::SeqCst);
        true
    }
}
