use crate::error::Result;
use crate::simulation::Simulator;
use crate::tree::NodeRef;
use crossbeam::utils::Backoff;
use std::thread;
use std::time::Duration;

mod deterministic;
mod random;
mod rollout;
mod ucb;

pub use deterministic::DeterministicSampler;
pub use random::RandomSampler;
pub use rollout::{
    DepthEvaluation, EvaluationFunction, FnEvaluation, RandomRollout, RolloutPolicy,
};
pub use ucb::UcbSampler;

/// Decides where a worker goes in the tree and what it does once there.
///
/// An episode runs in three phases. The tree policy walks the existing tree from the stage root
/// to a node it reserves. The expansion policy then creates new children below it, one per call,
/// each returned provisional (linked but without a state). Finally the rollout policy may drive
/// the simulation beyond the tree. Each phase repeats until its guard says it is done.
///
/// Every worker gets its own copy via [`SearchPolicy::boxed_clone`].
pub trait SearchPolicy<A, S>: Send {
    /// Called at the start of every episode, before any guard.
    fn episode_started(&mut self) {}

    /// Returns a node reserved for the calling worker, or `None` if nothing below `start` can be
    /// claimed right now.
    fn tree_policy(&mut self, start: &NodeRef<A, S>) -> Option<NodeRef<A, S>>;
    fn tree_policy_action_done(&mut self, current: &NodeRef<A, S>);
    fn tree_policy_guard(&self, current: &NodeRef<A, S>) -> bool;

    /// Must return a new provisional child of `start`.
    fn expansion_policy(&mut self, start: &NodeRef<A, S>) -> Result<NodeRef<A, S>>;
    fn expansion_policy_action_done(&mut self, current: &NodeRef<A, S>);
    fn expansion_policy_guard(&self, current: &NodeRef<A, S>) -> bool;

    fn rollout_policy(&mut self, start: &NodeRef<A, S>, simulator: &mut dyn Simulator<A, S>);
    fn rollout_policy_guard(&self, current: &NodeRef<A, S>) -> bool;

    fn boxed_clone(&self) -> Box<dyn SearchPolicy<A, S>>;
}

/// Back-off for tree policies that find everything locked: spin briefly, then sleep with a
/// doubling delay, and give up once the delay passes the cap.
pub(crate) struct Contention {
    backoff: Backoff,
    delay_ms: u64,
    cap_ms: u64,
}

impl Contention {
    pub(crate) fn new(cap_ms: u64) -> Self {
        Contention {
            backoff: Backoff::new(),
            delay_ms: 1,
            cap_ms,
        }
    }

    /// False once waiting any longer is pointless.
    pub(crate) fn wait(&mut self) -> bool {
        if !self.backoff.is_completed() {
            self.backoff.snooze();
            return true;
        }
        if self.delay_ms > self.cap_ms {
            self.reset();
            return false;
        }
        thread::sleep(Duration::from_millis(self.delay_ms));
        self.delay_ms *= 2;
        true
    }

    pub(crate) fn reset(&mut self) {
        self.backoff.reset();
        self.delay_ms = 1;
    }

    pub(crate) fn cap_ms(&self) -> u64 {
        self.cap_ms
    }
}

pub(crate) const DEFAULT_BACKOFF_CAP_MS: u64 = 128;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::simulation::Simulator;

    /// Drives one episode through a policy the way a worker does, on the calling thread.
    /// Returns the node the episode ended at, or `None` if the tree policy found nothing.
    pub(crate) fn play_episode<A: crate::simulation::Action, S: crate::simulation::NodeState>(
        policy: &mut dyn SearchPolicy<A, S>,
        root: &NodeRef<A, S>,
        simulator: &mut dyn Simulator<A, S>,
    ) -> Option<NodeRef<A, S>> {
        simulator.reset_world();
        policy.episode_started();
        let mut cursor = root.clone();
        let mut reserved = None;
        if !policy.tree_policy_guard(&cursor) {
            let target = policy.tree_policy(&cursor)?;
            for a in target.sequence().unwrap_or_default() {
                simulator.step(&a);
            }
            policy.tree_policy_action_done(&target);
            reserved = Some(target.clone());
            cursor = target;
        }
        while !policy.expansion_policy_guard(&cursor) {
            let child = policy.expansion_policy(&cursor).ok()?;
            simulator.step(child.action().ok()?);
            child.set_state(simulator.current_state()).ok()?;
            policy.expansion_policy_action_done(&child);
            cursor = child;
        }
        while !policy.rollout_policy_guard(&cursor) {
            policy.rollout_policy(&cursor, simulator);
        }
        if let Some(r) = reserved {
            r.release_expansion_rights();
        }
        Some(cursor)
    }

    #[test]
    fn contention_gives_up_past_the_cap() {
        let mut contention = Contention::new(4);
        let mut waits = 0;
        while contention.wait() {
            waits += 1;
            assert!(waits < 100);
        }
        assert_eq!(contention.cap_ms(), 4);
        // Starts over afterwards.
        assert!(contention.wait());
    }
}
