use crate::error::{Result, TreeError};
use crate::policy::SearchPolicy;
use crate::simulation::{Action, NodeState};
use crate::sink::DataSink;
use crate::tree::NodeRef;
use crate::worker::Worker;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// When a stage is over. Depths count from the stage root. Every condition except
/// `SearchForever` also holds once the stage root is fully explored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Termination {
    /// Episodes played by this stage's workers.
    FixedEpisodes { episodes: u64 },
    /// Some branch is `depth` deep, or `max_episodes` were played without getting there.
    MaxDepth { depth: u32, max_episodes: u64 },
    /// Every branch either failed early or is `depth` deep with nothing left untried above
    /// that horizon.
    MinDepth { depth: u32 },
    FullyExplored,
    /// Only an external stop ends it.
    SearchForever,
}

impl Termination {
    pub fn is_met<A: Action, S: NodeState>(
        &self,
        root: &NodeRef<A, S>,
        episodes: u64,
        workers_running: bool,
    ) -> bool {
        if let Termination::SearchForever = self {
            return false;
        }
        if root.is_fully_explored() {
            return true;
        }
        match self {
            Termination::FixedEpisodes { episodes: target } => episodes >= *target,
            Termination::MaxDepth {
                depth,
                max_episodes,
            } => root.max_branch_depth() >= root.tree_depth() + depth || episodes > *max_episodes,
            Termination::MinDepth { depth } => {
                !workers_running || min_depth_reached(root, root.tree_depth() + depth)
            }
            Termination::FullyExplored | Termination::SearchForever => false,
        }
    }

    /// The nodes a finished stage hands back.
    pub fn results<A: Action, S: NodeState>(
        &self,
        root: &NodeRef<A, S>,
        episodes: u64,
        state_polls: u32,
        state_interval: Duration,
    ) -> Result<Vec<NodeRef<A, S>>> {
        match self {
            Termination::MaxDepth {
                depth,
                max_episodes,
            } => {
                if root.is_fully_explored() || episodes > *max_episodes {
                    return Ok(vec![]);
                }
                match first_at_depth(root, root.tree_depth() + depth) {
                    Some(node) => {
                        node.wait_for_state(state_polls, state_interval)?;
                        Ok(vec![node])
                    }
                    None => Ok(vec![]),
                }
            }
            Termination::MinDepth { depth } => {
                let horizon = nodes_at_horizon(root, root.tree_depth() + depth);
                for node in &horizon {
                    node.wait_for_state(state_polls, state_interval)?;
                }
                Ok(horizon)
            }
            _ => Ok(vec![]),
        }
    }
}

fn ancestor_at<A: Action, S: NodeState>(node: &NodeRef<A, S>, depth: u32) -> NodeRef<A, S> {
    let mut current = node.clone();
    while current.tree_depth() > depth {
        match current.parent() {
            Some(p) => current = p,
            None => break,
        }
    }
    current
}

/// Every leaf either failed short of the horizon or reaches it, and no node above the horizon
/// still has untried actions.
pub fn min_depth_reached<A: Action, S: NodeState>(root: &NodeRef<A, S>, horizon: u32) -> bool {
    for leaf in root.leaves() {
        if leaf.tree_depth() < horizon && !leaf.is_failed() {
            return false;
        }
        let mut current = ancestor_at(&leaf, horizon);
        while current.tree_depth() > root.tree_depth() {
            current = match current.parent() {
                Some(p) => p,
                None => break,
            };
            if current.untried_action_count() > 0 {
                return false;
            }
        }
    }
    true
}

// Prefers a node that did not fail, so the next stage has somewhere to go.
fn first_at_depth<A: Action, S: NodeState>(
    root: &NodeRef<A, S>,
    depth: u32,
) -> Option<NodeRef<A, S>> {
    let mut fallback = None;
    for leaf in root.leaves() {
        if leaf.tree_depth() < depth {
            continue;
        }
        let node = ancestor_at(&leaf, depth);
        if !node.is_failed() {
            return Some(node);
        }
        if fallback.is_none() {
            fallback = Some(node);
        }
    }
    fallback
}

fn nodes_at_horizon<A: Action, S: NodeState>(
    root: &NodeRef<A, S>,
    horizon: u32,
) -> Vec<NodeRef<A, S>> {
    let mut found: Vec<NodeRef<A, S>> = vec![];
    for leaf in root.leaves() {
        if leaf.tree_depth() < horizon {
            continue;
        }
        let node = ancestor_at(&leaf, horizon);
        if !found.iter().any(|f| Arc::ptr_eq(f, &node)) {
            found.push(node);
        }
    }
    found
}

pub struct StageResults<A, S> {
    pub nodes: Vec<NodeRef<A, S>>,
    pub episodes_played: u64,
    pub elapsed: Duration,
}

/// One search phase over a set of workers.
///
/// Running a stage assigns every worker the stage root and its own copy of the policy and
/// sink, starts them, and polls the termination condition. When it holds, the stage computes
/// its results, flushes the sink and pauses every worker.
pub struct Stage<A, S> {
    termination: Termination,
    policy: Box<dyn SearchPolicy<A, S>>,
    sink: Box<dyn DataSink<A, S>>,
    poll_interval: Duration,
    state_polls: u32,
    state_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl<A: Action, S: NodeState> Stage<A, S> {
    pub fn new(
        termination: Termination,
        policy: Box<dyn SearchPolicy<A, S>>,
        sink: Box<dyn DataSink<A, S>>,
    ) -> Self {
        Stage {
            termination,
            policy,
            sink,
            poll_interval: Duration::from_millis(5),
            state_polls: 200,
            state_interval: Duration::from_millis(5),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bounds the wait for result nodes whose state is still being simulated.
    pub fn with_state_wait(mut self, polls: u32, interval: Duration) -> Self {
        self.state_polls = polls;
        self.state_interval = interval;
        self
    }

    pub fn termination(&self) -> &Termination {
        &self.termination
    }

    /// Setting the flag ends the stage at its next poll.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Blocks until the stage terminates.
    pub fn run(
        &mut self,
        workers: &mut [Worker<A, S>],
        root: &NodeRef<A, S>,
    ) -> Result<StageResults<A, S>> {
        if workers.is_empty() {
            return Err(TreeError::NoWorkers);
        }
        self.stop.store(false, Ordering::SeqCst);
        let started = Instant::now();
        let baseline: u64 = workers.iter().map(|w| w.episodes_played()).sum();
        info!(
            "Starting stage {:?} at depth {} with {} workers",
            self.termination,
            root.tree_depth(),
            workers.len()
        );
        for w in workers.iter() {
            w.assign(root.clone(), self.policy.boxed_clone(), self.sink.boxed_clone());
        }
        for w in workers.iter() {
            w.start()?;
        }

        let played = || workers.iter().map(|w| w.episodes_played()).sum::<u64>() - baseline;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!("Stage stopped");
                break;
            }
            let running = workers.iter().any(|w| w.is_running());
            if self.termination.is_met(root, played(), running) {
                info!("Stage termination conditions met");
                break;
            }
            thread::sleep(self.poll_interval);
        }

        let episodes = played();
        let results =
            self.termination
                .results(root, episodes, self.state_polls, self.state_interval);
        self.sink.on_stage_end(
            &root.root(),
            results.as_ref().map(|r| r.as_slice()).unwrap_or(&[]),
        );
        for w in workers.iter() {
            w.pause();
        }
        let nodes = results?;
        let elapsed = started.elapsed();
        debug!(
            "Stage played {} episodes in {:?}, returning {} nodes",
            episodes,
            elapsed,
            nodes.len()
        );
        Ok(StageResults {
            nodes,
            episodes_played: played(),
            elapsed,
        })
    }

    /// Runs the stage on a thread of its own. The workers come back through
    /// [`StageHandle::join`].
    pub fn spawn(mut self, mut workers: Vec<Worker<A, S>>, root: NodeRef<A, S>) -> StageHandle<A, S> {
        let stop = self.stop_flag();
        let thread = thread::spawn(move || {
            let results = self.run(&mut workers, &root);
            (workers, results)
        });
        StageHandle { stop, thread }
    }
}

pub struct StageHandle<A, S> {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<(Vec<Worker<A, S>>, Result<StageResults<A, S>>)>,
}

impl<A, S> StageHandle<A, S> {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> (Vec<Worker<A, S>>, Result<StageResults<A, S>>) {
        match self.thread.join() {
            Ok(done) => done,
            Err(_) => (vec![], Err(TreeError::StagePanicked)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DeterministicSampler, RandomSampler};
    use crate::simulation::corridor::{thrusts, Corridor, RunnerState, Thrust};
    use crate::simulation::fixtures::Flag;
    use crate::simulation::graph_walk::tests::{binary, root_of};
    use crate::simulation::graph_walk::{GraphWalk, WalkState};
    use crate::simulation::FixedActions;
    use crate::sink::{NullSink, RecordingSink};
    use crate::tree::{import_episodes, Node};
    use crate::worker::WorkerPool;

    fn corridor_pool(n: usize) -> WorkerPool<Thrust, RunnerState> {
        WorkerPool::new(n, |_| Box::new(Corridor::new(2))).unwrap()
    }

    fn corridor_root() -> NodeRef<Thrust, RunnerState> {
        Node::new_root(Corridor::initial_state(), Arc::new(thrusts()))
    }

    #[test]
    fn stage_needs_workers() {
        let mut stage: Stage<Thrust, RunnerState> = Stage::new(
            Termination::FixedEpisodes { episodes: 1 },
            Box::new(RandomSampler::new()),
            Box::new(NullSink),
        );
        let err = stage.run(&mut [], &corridor_root()).err();
        assert_eq!(err, Some(TreeError::NoWorkers));
    }

    #[test]
    fn fixed_episodes() {
        let mut pool = corridor_pool(3);
        let root = corridor_root();
        let sink = RecordingSink::new();
        let mut stage = Stage::new(
            Termination::FixedEpisodes { episodes: 20 },
            Box::new(RandomSampler::new()),
            sink.boxed_clone(),
        );
        let results = stage.run(pool.workers_mut(), &root).unwrap();
        assert!(results.nodes.is_empty());
        assert!(results.episodes_played >= 20);
        assert!(pool.workers().iter().all(|w| w.is_paused()));
        assert_eq!(sink.episode_count() as u64, pool.total_episodes());
    }

    #[test]
    fn max_depth_returns_a_node_at_depth() {
        let map = binary(12);
        let root = root_of(&map);
        let mut pool: WorkerPool<u32, WalkState> =
            WorkerPool::new(2, |_| Box::new(GraphWalk::new(map.clone()))).unwrap();
        let mut stage = Stage::new(
            Termination::MaxDepth {
                depth: 6,
                max_episodes: 100_000,
            },
            Box::new(DeterministicSampler::new(u32::MAX)),
            Box::new(NullSink),
        );
        let results = stage.run(pool.workers_mut(), &root).unwrap();
        assert_eq!(results.nodes.len(), 1);
        let node = &results.nodes[0];
        assert_eq!(node.tree_depth(), 6);
        assert!(node.has_state());

        // A second stage continues from where the first one ended.
        let mut deeper = Stage::new(
            Termination::MaxDepth {
                depth: 3,
                max_episodes: 100_000,
            },
            Box::new(DeterministicSampler::new(u32::MAX)),
            Box::new(NullSink),
        );
        let next = deeper.run(pool.workers_mut(), node).unwrap();
        assert_eq!(next.nodes.len(), 1);
        assert_eq!(next.nodes[0].tree_depth(), 9);
        assert!(node.is_ancestor(&next.nodes[0]));
    }

    #[test]
    fn max_depth_gives_up_after_its_budget() {
        let mut pool = corridor_pool(1);
        let root = corridor_root();
        let mut stage = Stage::new(
            Termination::MaxDepth {
                depth: 10_000,
                max_episodes: 5,
            },
            Box::new(RandomSampler::new()),
            Box::new(NullSink),
        );
        let results = stage.run(pool.workers_mut(), &root).unwrap();
        assert!(results.nodes.is_empty());
        assert!(results.episodes_played > 5);
    }

    #[test]
    fn min_depth_on_a_finite_tree() {
        let map = binary(5);
        let root = root_of(&map);
        let mut pool: WorkerPool<u32, WalkState> =
            WorkerPool::new(3, |_| Box::new(GraphWalk::new(map.clone()))).unwrap();
        let mut stage = Stage::new(
            Termination::MinDepth { depth: 2 },
            Box::new(RandomSampler::new()),
            Box::new(NullSink),
        );
        let results = stage.run(pool.workers_mut(), &root).unwrap();
        assert_eq!(results.nodes.len(), 4);
        assert!(results.nodes.iter().all(|n| n.tree_depth() == 2));
    }

    #[test]
    fn fully_explored_ends_every_stage() {
        let map = binary(3);
        let root = root_of(&map);
        let mut pool: WorkerPool<u32, WalkState> =
            WorkerPool::new(2, |_| Box::new(GraphWalk::new(map.clone()))).unwrap();
        let mut stage = Stage::new(
            Termination::FixedEpisodes { episodes: 1_000_000 },
            Box::new(RandomSampler::new()),
            Box::new(NullSink),
        );
        stage.run(pool.workers_mut(), &root).unwrap();
        assert!(root.is_fully_explored());
        assert_eq!(root.count_descendants(), 14);
    }

    #[test]
    fn spawned_stage_can_be_stopped() {
        let mut pool = corridor_pool(2);
        let root = corridor_root();
        let stage = Stage::new(
            Termination::SearchForever,
            Box::new(RandomSampler::new()),
            Box::new(NullSink),
        );
        let handle = stage.spawn(pool.take(), root.clone());
        thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());
        handle.stop();
        let (workers, results) = handle.join();
        assert_eq!(workers.len(), 2);
        assert!(results.unwrap().nodes.is_empty());
        pool.give_back(workers);
        assert!(root.descendant_count() > 0);
    }

    #[test]
    fn min_depth_predicate() {
        let root: NodeRef<u8, Flag> =
            Node::new_root(Flag(false), Arc::new(FixedActions::new(vec![0u8, 1])));
        assert!(!min_depth_reached(&root, 2));
        let episodes = vec![
            crate::tree::RecordedEpisode {
                actions: vec![0, 0],
                states: vec![Flag(false), Flag(false)],
            },
            crate::tree::RecordedEpisode {
                actions: vec![1],
                states: vec![Flag(true)],
            },
        ];
        import_episodes(&root, &episodes).unwrap();
        // The node at depth 1 still has action 1 untried.
        assert!(!min_depth_reached(&root, 2));
        import_episodes(
            &root,
            &[crate::tree::RecordedEpisode {
                actions: vec![0, 1],
                states: vec![Flag(false), Flag(false)],
            }],
        )
        .unwrap();
        assert!(min_depth_reached(&root, 2));
        assert_eq!(nodes_at_horizon(&root, 2).len(), 2);
        assert_eq!(first_at_depth(&root, 2).unwrap().tree_depth(), 2);
    }
}
