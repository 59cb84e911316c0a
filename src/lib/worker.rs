use crate::counters;
use crate::error::{Result, TreeError};
use crate::policy::SearchPolicy;
use crate::simulation::{Action, NodeState, Simulator};
use crate::sink::DataSink;
use crate::tree::NodeRef;
use crossbeam::atomic::AtomicCell;
use log::{debug, error, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Where a worker is within an episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Initialize,
    TreePolicyChoosing,
    TreePolicyExecuting,
    ExpansionPolicyChoosing,
    ExpansionPolicyExecuting,
    RolloutPolicy,
    EvaluateEpisode,
}

static WORKERS_SPAWNED: AtomicUsize = AtomicUsize::new(0);

struct Assignment<A, S> {
    root: NodeRef<A, S>,
    policy: Box<dyn SearchPolicy<A, S>>,
    sink: Box<dyn DataSink<A, S>>,
}

struct Control<A, S> {
    paused: bool,
    parked: bool,
    assigned: bool,
    pending: Option<Assignment<A, S>>,
}

struct Shared<A, S> {
    control: Mutex<Control<A, S>>,
    changed: Condvar,
    terminate: AtomicBool,
    running: AtomicBool,
    status: AtomicCell<WorkerStatus>,
    episodes: AtomicU64,
    steps: AtomicU64,
}

/// One search thread with its own simulator.
///
/// Workers start paused. A stage hands them a root, a policy and a sink with
/// [`Worker::assign`], and then [`Worker::start`]s and [`Worker::pause`]s them. Pausing takes
/// effect at the end of the current episode.
pub struct Worker<A, S> {
    id: usize,
    name: String,
    shared: Arc<Shared<A, S>>,
    thread: Option<JoinHandle<()>>,
}

impl<A: Action, S: NodeState> Worker<A, S> {
    pub fn spawn(simulator: Box<dyn Simulator<A, S>>) -> Result<Self> {
        let id = WORKERS_SPAWNED.fetch_add(1, Ordering::SeqCst);
        let name = format!("worker{}", id);
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                paused: true,
                parked: false,
                assigned: false,
                pending: None,
            }),
            changed: Condvar::new(),
            terminate: AtomicBool::new(false),
            running: AtomicBool::new(true),
            status: AtomicCell::new(WorkerStatus::Idle),
            episodes: AtomicU64::new(0),
            steps: AtomicU64::new(0),
        });
        let fsm = Fsm {
            name: name.clone(),
            shared: shared.clone(),
            simulator,
            job: None,
            episode: Episode::default(),
        };
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || fsm.run())
            .map_err(|e| TreeError::Spawn(e.to_string()))?;
        debug!("{} spawned", name);
        Ok(Worker {
            id,
            name,
            shared,
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> WorkerStatus {
        self.shared.status.load()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.control.lock().paused
    }

    pub fn episodes_played(&self) -> u64 {
        self.shared.episodes.load(Ordering::SeqCst)
    }

    pub fn steps_simulated(&self) -> u64 {
        self.shared.steps.load(Ordering::SeqCst)
    }

    /// Takes effect the next time the worker is idle.
    pub fn assign(
        &self,
        root: NodeRef<A, S>,
        policy: Box<dyn SearchPolicy<A, S>>,
        sink: Box<dyn DataSink<A, S>>,
    ) {
        let mut control = self.shared.control.lock();
        control.assigned = true;
        control.pending = Some(Assignment { root, policy, sink });
    }

    pub fn start(&self) -> Result<()> {
        let mut control = self.shared.control.lock();
        if !control.assigned {
            return Err(TreeError::WorkerUnassigned(self.id));
        }
        control.paused = false;
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Blocks until the worker has finished its current episode and parked.
    pub fn pause(&self) {
        let mut control = self.shared.control.lock();
        control.paused = true;
        while !control.parked && self.shared.running.load(Ordering::SeqCst) {
            self.shared.changed.wait(&mut control);
        }
    }

    /// Stops the thread after its current episode and joins it.
    pub fn terminate(&mut self) {
        self.shared.terminate.store(true, Ordering::SeqCst);
        {
            let _control = self.shared.control.lock();
            self.shared.changed.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("{} panicked", self.name);
            }
        }
    }
}

impl<A, S> Drop for Worker<A, S> {
    fn drop(&mut self) {
        self.shared.terminate.store(true, Ordering::SeqCst);
        {
            let _control = self.shared.control.lock();
            self.shared.changed.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Per-episode bookkeeping of the thread.
struct Episode<A, S> {
    // Where the tree policy continues from.
    cursor: Option<NodeRef<A, S>>,
    // The node whose state the simulator is in, if it is in the tree at all.
    at: Option<NodeRef<A, S>>,
    target: Option<NodeRef<A, S>>,
    reserved: Option<NodeRef<A, S>>,
    expanding: Option<NodeRef<A, S>>,
    queue: VecDeque<A>,
}

impl<A, S> Default for Episode<A, S> {
    fn default() -> Self {
        Episode {
            cursor: None,
            at: None,
            target: None,
            reserved: None,
            expanding: None,
            queue: VecDeque::new(),
        }
    }
}

struct Fsm<A, S> {
    name: String,
    shared: Arc<Shared<A, S>>,
    simulator: Box<dyn Simulator<A, S>>,
    job: Option<Assignment<A, S>>,
    episode: Episode<A, S>,
}

impl<A: Action, S: NodeState> Fsm<A, S> {
    fn run(mut self) {
        while let Some(next) = self.advance() {
            self.change_status(next);
        }
        let _control = self.shared.control.lock();
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.changed.notify_all();
        debug!("{} exited", self.name);
    }

    fn change_status(&self, next: WorkerStatus) {
        let previous = self.shared.status.swap(next);
        if previous != next {
            trace!("{}: {:?} -> {:?}", self.name, previous, next);
        }
    }

    fn advance(&mut self) -> Option<WorkerStatus> {
        let next = match self.shared.status.load() {
            WorkerStatus::Idle => return self.idle(),
            WorkerStatus::Initialize => self.initialize(),
            WorkerStatus::TreePolicyChoosing => self.tree_policy_choosing(),
            WorkerStatus::TreePolicyExecuting => self.tree_policy_executing(),
            WorkerStatus::ExpansionPolicyChoosing => self.expansion_policy_choosing(),
            WorkerStatus::ExpansionPolicyExecuting => self.expansion_policy_executing(),
            WorkerStatus::RolloutPolicy => self.rollout_policy(),
            WorkerStatus::EvaluateEpisode => self.evaluate_episode(),
        };
        Some(next)
    }

    fn idle(&mut self) -> Option<WorkerStatus> {
        let mut control = self.shared.control.lock();
        if let Some(assignment) = control.pending.take() {
            self.job = Some(assignment);
        }
        if let Some(job) = &self.job {
            if job.root.is_fully_explored() && !control.paused {
                debug!("{}: root fully explored, pausing", self.name);
                control.paused = true;
            }
        }
        if control.paused && !self.shared.terminate.load(Ordering::SeqCst) {
            control.parked = true;
            self.shared.changed.notify_all();
            while control.paused && !self.shared.terminate.load(Ordering::SeqCst) {
                self.shared.changed.wait(&mut control);
            }
            control.parked = false;
        }
        if self.shared.terminate.load(Ordering::SeqCst) {
            return None;
        }
        if control.pending.is_some() || self.job.is_none() {
            // Picked up on the next pass.
            return Some(WorkerStatus::Idle);
        }
        Some(WorkerStatus::Initialize)
    }

    fn initialize(&mut self) -> WorkerStatus {
        let root = match &mut self.job {
            Some(job) => {
                job.policy.episode_started();
                job.root.clone()
            }
            None => return WorkerStatus::Idle,
        };
        self.episode = Episode::default();
        self.restart_simulation(&root);
        self.episode.cursor = Some(root);
        WorkerStatus::TreePolicyChoosing
    }

    fn restart_simulation(&mut self, stage_root: &NodeRef<A, S>) {
        self.simulator.reset_world();
        if let Some(job) = &mut self.job {
            job.sink.on_episode_start(&self.simulator.current_state());
        }
        self.episode.at = Some(stage_root.root());
    }

    fn step(&mut self, action: &A) {
        self.simulator.step(action);
        if let Some(job) = &mut self.job {
            job.sink.on_timestep(action, self.simulator.as_ref());
        }
        self.shared.steps.fetch_add(1, Ordering::SeqCst);
    }

    /// Drops the current episode, giving back any reserved node.
    fn abort_episode(&mut self) -> WorkerStatus {
        if let Some(node) = self.episode.reserved.take() {
            node.release_expansion_rights();
        }
        self.episode = Episode::default();
        WorkerStatus::Idle
    }

    fn tree_policy_choosing(&mut self) -> WorkerStatus {
        let cursor = match self.episode.cursor.clone() {
            Some(c) => c,
            None => return self.abort_episode(),
        };
        if self.simulator.is_failed() {
            error!("{}: tree policy reached a failed simulation", self.name);
            return self.abort_episode();
        }
        let job = match &mut self.job {
            Some(job) => job,
            None => return self.abort_episode(),
        };
        if job.policy.tree_policy_guard(&cursor) {
            return WorkerStatus::ExpansionPolicyChoosing;
        }
        let target = match job.policy.tree_policy(&cursor) {
            Some(target) => target,
            None => {
                debug!("{}: tree policy found nothing to claim", self.name);
                return self.abort_episode();
            }
        };
        if !target.is_locked() {
            error!(
                "{}: tree policy returned an unreserved node at depth {}",
                self.name,
                target.tree_depth()
            );
            return self.abort_episode();
        }
        self.episode.reserved = Some(target.clone());
        if target.is_failed() {
            error!("{}: tree policy returned a failed node", self.name);
            return self.abort_episode();
        }
        self.plan_route(&target, &cursor);
        self.episode.target = Some(target);
        WorkerStatus::TreePolicyExecuting
    }

    /// Queues the actions taking the simulator from where it is to `target`, resetting it first
    /// if `target` is not below that point.
    fn plan_route(&mut self, target: &NodeRef<A, S>, cursor: &NodeRef<A, S>) {
        let on_the_way = match &self.episode.at {
            Some(at) => at.is_ancestor_or_self(target),
            None => false,
        };
        if !on_the_way {
            self.restart_simulation(cursor);
        }
        let from = self
            .episode
            .at
            .as_ref()
            .map(|n| n.tree_depth())
            .unwrap_or(0);
        self.episode.queue.clear();
        if target.tree_depth() > from {
            if let Ok(sequence) = target.sequence() {
                self.episode
                    .queue
                    .extend(sequence.into_iter().skip(from as usize));
            }
        }
    }

    fn tree_policy_executing(&mut self) -> WorkerStatus {
        if let Some(action) = self.episode.queue.pop_front() {
            self.step(&action);
            if self.simulator.is_failed() {
                warn!("{}: simulation failed while replaying the tree", self.name);
                return self.abort_episode();
            }
        }
        if !self.episode.queue.is_empty() {
            return WorkerStatus::TreePolicyExecuting;
        }
        let target = match self.episode.target.take() {
            Some(t) => t,
            None => return self.abort_episode(),
        };
        self.episode.at = Some(target.clone());
        if target.untried_action_count() == 0 {
            // Someone else used up the last untried action in the meantime.
            debug!("{}: target exhausted, restarting from the root", self.name);
            if let Some(node) = self.episode.reserved.take() {
                node.release_expansion_rights();
            }
            self.episode.cursor = self.job.as_ref().map(|j| j.root.clone());
            return WorkerStatus::TreePolicyChoosing;
        }
        self.episode.cursor = Some(target.clone());
        if let Some(job) = &mut self.job {
            job.policy.tree_policy_action_done(&target);
        }
        WorkerStatus::ExpansionPolicyChoosing
    }

    fn expansion_policy_choosing(&mut self) -> WorkerStatus {
        let cursor = match self.episode.cursor.clone() {
            Some(c) => c,
            None => return self.abort_episode(),
        };
        let job = match &mut self.job {
            Some(job) => job,
            None => return self.abort_episode(),
        };
        if job.policy.expansion_policy_guard(&cursor) {
            return WorkerStatus::RolloutPolicy;
        }
        let expanded = job
            .policy
            .expansion_policy(&cursor)
            .and_then(|node| check_expansion(&cursor, &node).map(|_| node));
        let node = match expanded {
            Ok(node) => node,
            Err(e) => {
                error!("{}: {}", self.name, e);
                return self.abort_episode();
            }
        };
        match node.action() {
            Ok(a) => self.episode.queue.push_back(a.clone()),
            Err(e) => {
                error!("{}: {}", self.name, e);
                return self.abort_episode();
            }
        }
        self.episode.expanding = Some(node);
        WorkerStatus::ExpansionPolicyExecuting
    }

    fn expansion_policy_executing(&mut self) -> WorkerStatus {
        if let Some(action) = self.episode.queue.pop_front() {
            self.step(&action);
        }
        if !self.episode.queue.is_empty() && !self.simulator.is_failed() {
            return WorkerStatus::ExpansionPolicyExecuting;
        }
        self.episode.queue.clear();
        let node = match self.episode.expanding.take() {
            Some(n) => n,
            None => return self.abort_episode(),
        };
        if let Err(e) = node.set_state(self.simulator.current_state()) {
            error!("{}: {}", self.name, e);
            return self.abort_episode();
        }
        self.episode.at = Some(node.clone());
        self.episode.cursor = Some(node.clone());
        if let Some(job) = &mut self.job {
            job.policy.expansion_policy_action_done(&node);
        }
        WorkerStatus::ExpansionPolicyChoosing
    }

    fn rollout_policy(&mut self) -> WorkerStatus {
        let cursor = match self.episode.cursor.clone() {
            Some(c) => c,
            None => return self.abort_episode(),
        };
        let job = match &mut self.job {
            Some(job) => job,
            None => return self.abort_episode(),
        };
        if job.policy.rollout_policy_guard(&cursor) {
            return WorkerStatus::EvaluateEpisode;
        }
        job.policy
            .rollout_policy(&cursor, self.simulator.as_mut());
        // The simulation has left the tree.
        self.episode.at = None;
        WorkerStatus::RolloutPolicy
    }

    fn evaluate_episode(&mut self) -> WorkerStatus {
        if let (Some(job), Some(cursor)) = (&mut self.job, &self.episode.cursor) {
            job.sink.on_episode_end(cursor);
        }
        counters::global().episode_played(self.simulator.timesteps_this_episode());
        self.shared.episodes.fetch_add(1, Ordering::SeqCst);
        if let Some(node) = self.episode.reserved.take() {
            node.release_expansion_rights();
        }
        self.episode = Episode::default();
        WorkerStatus::Idle
    }
}

/// The expansion policy must hand back a brand new child of `cursor`.
fn check_expansion<A: Action, S: NodeState>(
    cursor: &NodeRef<A, S>,
    node: &NodeRef<A, S>,
) -> Result<()> {
    let is_child = node
        .parent()
        .map_or(false, |p| Arc::ptr_eq(&p, cursor));
    if node.tree_depth() != cursor.tree_depth() + 1 || !is_child {
        return Err(TreeError::ExpansionContract {
            expected_depth: cursor.tree_depth() + 1,
            actual_depth: node.tree_depth(),
        });
    }
    Ok(())
}

/// Spawns and owns a set of workers, each with its own simulator.
pub struct WorkerPool<A, S> {
    workers: Vec<Worker<A, S>>,
}

impl<A: Action, S: NodeState> WorkerPool<A, S> {
    /// `simulator` is called once per worker with the worker's index.
    pub fn new<F>(count: usize, mut simulator: F) -> Result<Self>
    where
        F: FnMut(usize) -> Box<dyn Simulator<A, S>>,
    {
        let workers = (0..count)
            .map(|i| Worker::spawn(simulator(i)))
            .collect::<Result<Vec<_>>>()?;
        Ok(WorkerPool { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn workers(&self) -> &[Worker<A, S>] {
        &self.workers
    }

    pub fn workers_mut(&mut self) -> &mut [Worker<A, S>] {
        &mut self.workers
    }

    /// Hands the workers over, for instance to a spawned stage.
    pub fn take(&mut self) -> Vec<Worker<A, S>> {
        std::mem::take(&mut self.workers)
    }

    pub fn give_back(&mut self, workers: Vec<Worker<A, S>>) {
        self.workers.extend(workers);
    }

    pub fn total_episodes(&self) -> u64 {
        self.workers.iter().map(|w| w.episodes_played()).sum()
    }

    pub fn total_steps(&self) -> u64 {
        self.workers.iter().map(|w| w.steps_simulated()).sum()
    }

    pub fn terminate_all(&mut self) {
        for w in self.workers.iter_mut() {
            w.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{RandomSampler, SearchPolicy};
    use crate::simulation::corridor::{thrusts, Corridor, RunnerState, Thrust};
    use crate::simulation::graph_walk::tests::{binary, root_of};
    use crate::simulation::graph_walk::{GraphWalk, WalkState};
    use crate::sink::{NullSink, RecordingSink};
    use crate::tree::Node;
    use std::time::{Duration, Instant};

    fn wait_until<F: Fn() -> bool>(f: F) {
        let started = Instant::now();
        while !f() {
            assert!(started.elapsed() < Duration::from_secs(10));
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn unassigned_workers_refuse_to_start() {
        let map = binary(1);
        let mut worker: Worker<u32, WalkState> =
            Worker::spawn(Box::new(GraphWalk::new(map))).unwrap();
        assert_eq!(
            worker.start().unwrap_err(),
            TreeError::WorkerUnassigned(worker.id())
        );
        worker.terminate();
        assert!(!worker.is_running());
    }

    #[test]
    fn worker_explores_until_root_is_finished() {
        let map = binary(4);
        let root = root_of(&map);
        let sink = RecordingSink::new();
        let worker: Worker<u32, WalkState> =
            Worker::spawn(Box::new(GraphWalk::new(map.clone()))).unwrap();
        worker.assign(root.clone(), Box::new(RandomSampler::new()), sink.boxed_clone());
        worker.start().unwrap();
        wait_until(|| root.is_fully_explored());
        worker.pause();
        assert_eq!(worker.status(), WorkerStatus::Idle);
        assert_eq!(root.count_descendants(), 30);
        assert!(!root.is_locked());
        assert_eq!(sink.episode_count() as u64, worker.episodes_played());
        // Every recorded episode retraces a branch of the tree.
        for episode in sink.episodes() {
            assert!(!episode.actions.is_empty());
        }
        assert!(worker.steps_simulated() >= 30);
    }

    #[test]
    fn pause_and_resume() {
        let root = Node::new_root(Corridor::initial_state(), Arc::new(thrusts()));
        let worker: Worker<Thrust, RunnerState> =
            Worker::spawn(Box::new(Corridor::new(2))).unwrap();
        let policy: Box<dyn SearchPolicy<_, _>> = Box::new(RandomSampler::new());
        worker.assign(root.clone(), policy, Box::new(NullSink));
        worker.start().unwrap();
        wait_until(|| worker.episodes_played() >= 5);
        worker.pause();
        assert!(worker.is_paused());
        let played = worker.episodes_played();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(worker.episodes_played(), played);
        worker.start().unwrap();
        wait_until(|| worker.episodes_played() > played);
        worker.pause();
    }

    #[test]
    fn many_workers_share_one_tree() {
        let map = binary(6);
        let root = root_of(&map);
        let mut pool: WorkerPool<u32, WalkState> =
            WorkerPool::new(4, |_| Box::new(GraphWalk::new(map.clone()))).unwrap();
        for w in pool.workers() {
            w.assign(root.clone(), Box::new(RandomSampler::new()), Box::new(NullSink));
            w.start().unwrap();
        }
        wait_until(|| root.is_fully_explored());
        for w in pool.workers() {
            w.pause();
        }
        // Every place reached exactly once, whichever worker got there.
        assert_eq!(root.count_descendants(), 126);
        assert_eq!(root.descendant_count(), 126);
        assert!(root.nodes_below().iter().all(|n| !n.is_locked()));
        pool.terminate_all();
    }
}
