use crate::simulation::{Action, NodeState, Simulator};
use crate::tree::{NodeRef, RecordedEpisode};
use dashmap::DashMap;
use log::info;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Receives what workers play. Each worker holds its own copy from
/// [`DataSink::boxed_clone`]; the stage keeps the original and calls
/// [`DataSink::on_stage_end`] on it once.
pub trait DataSink<A, S>: Send {
    fn on_episode_start(&mut self, _initial_state: &S) {}
    fn on_timestep(&mut self, _action: &A, _simulator: &dyn Simulator<A, S>) {}
    fn on_episode_end(&mut self, _terminal: &NodeRef<A, S>) {}
    fn on_stage_end(&mut self, _root: &NodeRef<A, S>, _results: &[NodeRef<A, S>]) {}
    fn boxed_clone(&self) -> Box<dyn DataSink<A, S>>;
}

/// Discards everything.
#[derive(Clone, Copy, Default)]
pub struct NullSink;

impl<A, S> DataSink<A, S> for NullSink {
    fn boxed_clone(&self) -> Box<dyn DataSink<A, S>> {
        Box::new(NullSink)
    }
}

/// Keeps every finished episode in memory, keyed by the copy that recorded it. All copies share
/// one store, so the episodes can be read back from any of them, for instance to import into
/// another tree.
pub struct RecordingSink<A, S> {
    store: Arc<DashMap<usize, Vec<RecordedEpisode<A, S>>>>,
    copies: Arc<AtomicUsize>,
    id: usize,
    current: RecordedEpisode<A, S>,
}

impl<A: Action, S: NodeState> RecordingSink<A, S> {
    pub fn new() -> Self {
        RecordingSink {
            store: Arc::new(DashMap::new()),
            copies: Arc::new(AtomicUsize::new(1)),
            id: 0,
            current: RecordedEpisode::default(),
        }
    }

    pub fn episode_count(&self) -> usize {
        self.store.iter().map(|e| e.value().len()).sum()
    }

    /// All recorded episodes, grouped by recording copy in creation order.
    pub fn episodes(&self) -> Vec<RecordedEpisode<A, S>> {
        let mut keys = self.store.iter().map(|e| *e.key()).collect::<Vec<_>>();
        keys.sort_unstable();
        keys.into_iter()
            .filter_map(|k| self.store.get(&k).map(|e| e.value().clone()))
            .flatten()
            .collect()
    }

    /// Like [`RecordingSink::episodes`] but empties the store.
    pub fn drain(&self) -> Vec<RecordedEpisode<A, S>> {
        let mut keys = self.store.iter().map(|e| *e.key()).collect::<Vec<_>>();
        keys.sort_unstable();
        keys.into_iter()
            .filter_map(|k| self.store.remove(&k).map(|(_, v)| v))
            .flatten()
            .collect()
    }
}

impl<A: Action, S: NodeState> Default for RecordingSink<A, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Action, S: NodeState> DataSink<A, S> for RecordingSink<A, S> {
    fn on_episode_start(&mut self, _: &S) {
        self.current = RecordedEpisode::default();
    }

    fn on_timestep(&mut self, action: &A, simulator: &dyn Simulator<A, S>) {
        self.current.actions.push(action.clone());
        self.current.states.push(simulator.current_state());
    }

    fn on_episode_end(&mut self, _: &NodeRef<A, S>) {
        let episode = std::mem::take(&mut self.current);
        self.store.entry(self.id).or_default().push(episode);
    }

    fn on_stage_end(&mut self, _: &NodeRef<A, S>, results: &[NodeRef<A, S>]) {
        info!(
            "Recorded {} episodes, stage returned {} nodes",
            self.episode_count(),
            results.len()
        );
    }

    fn boxed_clone(&self) -> Box<dyn DataSink<A, S>> {
        Box::new(RecordingSink {
            store: self.store.clone(),
            copies: self.copies.clone(),
            id: self.copies.fetch_add(1, Ordering::SeqCst),
            current: RecordedEpisode::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::graph_walk::tests::{problem1, root_of};
    use crate::simulation::graph_walk::{GraphWalk, WalkState};
    use crate::tree::import_episodes;

    fn play(
        copy: &mut dyn DataSink<u32, WalkState>,
        walk: &mut GraphWalk,
        actions: &[u32],
        root: &NodeRef<u32, WalkState>,
    ) {
        walk.reset_world();
        copy.on_episode_start(&walk.current_state());
        for action in actions {
            walk.step(action);
            copy.on_timestep(action, walk);
        }
        copy.on_episode_end(root);
    }

    #[test]
    fn copies_share_one_store() {
        let map = problem1();
        let root = root_of(&map);
        let sink = RecordingSink::new();
        let mut a = sink.boxed_clone();
        let mut b = sink.boxed_clone();
        let mut walk = GraphWalk::new(map.clone());

        play(a.as_mut(), &mut walk, &[0, 1], &root);
        play(b.as_mut(), &mut walk, &[1], &root);
        assert_eq!(sink.episode_count(), 2);
        let episodes = sink.episodes();
        assert_eq!(episodes[0].actions, vec![0, 1]);
        assert!(episodes[1].states[0].failed);

        // Recorded episodes graft straight back onto a tree.
        let fresh = root_of(&map);
        let summary = import_episodes(&fresh, &sink.drain()).unwrap();
        assert_eq!(summary.nodes_created, 3);
        assert_eq!(sink.episode_count(), 0);
    }
}
