use crate::simulation::{ActionGenerator, NodeState, Simulator};
use crate::tree::{Node, UntriedActions};
use petgraph::prelude::*;
use std::sync::Arc;

type Action = u32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkState {
    pub position: NodeIndex,
    pub failed: bool,
}

impl NodeState for WalkState {
    fn is_failed(&self) -> bool {
        self.failed
    }
}

/// A directed graph of places. Edges are labelled with the action that follows them; a place
/// weighted `true` is a failure.
pub struct WalkMap {
    start: NodeIndex,
    graph: Graph<bool, Action>,
}

impl WalkMap {
    pub fn new() -> Self {
        let mut graph = Graph::new();
        let start = graph.add_node(false);
        WalkMap { start, graph }
    }

    pub fn start(&self) -> NodeIndex {
        self.start
    }

    pub fn add_place(&mut self, failed: bool) -> NodeIndex {
        self.graph.add_node(failed)
    }

    pub fn connect(&mut self, from: NodeIndex, to: NodeIndex, action: Action) {
        self.graph.add_edge(from, to, action);
    }

    pub fn is_failed(&self, at: NodeIndex) -> bool {
        self.graph.node_weight(at).copied().unwrap_or(true)
    }

    pub fn follow(&self, from: NodeIndex, action: Action) -> Option<NodeIndex> {
        self.graph
            .edges(from)
            .find(|e| *e.weight() == action)
            .map(|e| e.target())
    }

    /// Petgraph iterates outgoing edges newest first; this returns them in insertion order.
    pub fn actions_from(&self, at: NodeIndex) -> Vec<Action> {
        let mut actions = self
            .graph
            .edges(at)
            .map(|e| *e.weight())
            .collect::<Vec<Action>>();
        actions.reverse();
        actions
    }

    pub fn position_after(&self, actions: &[Action]) -> Option<NodeIndex> {
        let mut at = self.start;
        for a in actions {
            at = self.follow(at, *a)?;
        }
        Some(at)
    }

    pub fn start_state(&self) -> WalkState {
        WalkState {
            position: self.start,
            failed: self.is_failed(self.start),
        }
    }
}

impl Default for WalkMap {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GraphWalk {
    map: Arc<WalkMap>,
    position: NodeIndex,
    failed: bool,
    timesteps: u64,
}

impl GraphWalk {
    pub fn new(map: Arc<WalkMap>) -> Self {
        let position = map.start();
        let failed = map.is_failed(position);
        GraphWalk {
            map,
            position,
            failed,
            timesteps: 0,
        }
    }
}

impl Simulator<Action, WalkState> for GraphWalk {
    fn reset_world(&mut self) {
        self.position = self.map.start();
        self.failed = self.map.is_failed(self.position);
        self.timesteps = 0;
    }

    // Taking an edge that does not exist is a fall.
    fn step(&mut self, action: &Action) {
        if self.failed {
            return;
        }
        self.timesteps += 1;
        match self.map.follow(self.position, *action) {
            Some(next) => {
                self.position = next;
                self.failed = self.map.is_failed(next);
            }
            None => self.failed = true,
        }
    }

    fn current_state(&self) -> WalkState {
        WalkState {
            position: self.position,
            failed: self.failed,
        }
    }

    fn is_failed(&self) -> bool {
        self.failed
    }

    fn timesteps_this_episode(&self) -> u64 {
        self.timesteps
    }
}

/// Offers the outgoing edges of the place a node stands on. Provisional nodes are located by
/// replaying their action sequence.
pub struct WalkActions {
    map: Arc<WalkMap>,
}

impl WalkActions {
    pub fn new(map: Arc<WalkMap>) -> Self {
        WalkActions { map }
    }
}

impl ActionGenerator<Action, WalkState> for WalkActions {
    fn candidates(&self, node: &Node<Action, WalkState>) -> UntriedActions<Action> {
        let position = match node.state() {
            Ok(state) => Some(state.position),
            Err(_) => node
                .sequence()
                .ok()
                .and_then(|s| self.map.position_after(&s)),
        };
        match position {
            Some(p) if !self.map.is_failed(p) => UntriedActions::uniform(self.map.actions_from(p)),
            _ => UntriedActions::empty(),
        }
    }
}
