use crate::error::{Result, TreeError};
use crate::policy::{Contention, SearchPolicy, DEFAULT_BACKOFF_CAP_MS};
use crate::simulation::{Action, NodeState, Simulator};
use crate::tree::NodeRef;
use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Walks down uniformly among viable children and untried actions, and then keeps expanding
/// random untried actions until the simulation fails. No rollout.
pub struct RandomSampler {
    rng: SmallRng,
    contention: Contention,
    tree_done: bool,
    expansion_done: bool,
}

impl RandomSampler {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        RandomSampler {
            rng,
            contention: Contention::new(DEFAULT_BACKOFF_CAP_MS),
            tree_done: false,
            expansion_done: false,
        }
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Action, S: NodeState> SearchPolicy<A, S> for RandomSampler {
    fn episode_started(&mut self) {
        self.tree_done = false;
        self.expansion_done = false;
    }

    fn tree_policy(&mut self, start: &NodeRef<A, S>) -> Option<NodeRef<A, S>> {
        let mut node = start.clone();
        loop {
            if start.is_fully_explored() {
                return None;
            }
            let viable = if node.is_locked() {
                vec![]
            } else {
                node.children()
                    .into_iter()
                    .filter(|c| c.is_viable())
                    .collect::<Vec<_>>()
            };
            let untried = if node.is_locked() {
                0
            } else {
                node.untried_action_count()
            };
            let options = viable.len() + untried;
            if options > 0 {
                let pick = self.rng.gen_range(0..options);
                if pick < viable.len() {
                    node = viable[pick].clone();
                    continue;
                }
                if node.reserve_expansion_rights() {
                    self.contention.reset();
                    return Some(node);
                }
            }
            if !self.contention.wait() {
                debug!("random sampler found nothing to claim below depth {}", start.tree_depth());
                return None;
            }
            node = start.clone();
        }
    }

    fn tree_policy_action_done(&mut self, _: &NodeRef<A, S>) {
        self.tree_done = true;
        self.expansion_done = false;
    }

    fn tree_policy_guard(&self, _: &NodeRef<A, S>) -> bool {
        self.tree_done
    }

    fn expansion_policy(&mut self, start: &NodeRef<A, S>) -> Result<NodeRef<A, S>> {
        let action = start
            .untried_action_random(&mut self.rng)
            .ok_or(TreeError::ExpansionContract {
                expected_depth: start.tree_depth() + 1,
                actual_depth: start.tree_depth(),
            })?;
        start.add_child(action)
    }

    fn expansion_policy_action_done(&mut self, current: &NodeRef<A, S>) {
        self.tree_done = false;
        self.expansion_done = current.is_failed() || current.untried_action_count() == 0;
    }

    fn expansion_policy_guard(&self, _: &NodeRef<A, S>) -> bool {
        self.expansion_done
    }

    fn rollout_policy(&mut self, _: &NodeRef<A, S>, _: &mut dyn Simulator<A, S>) {}

    fn rollout_policy_guard(&self, _: &NodeRef<A, S>) -> bool {
        true
    }

    fn boxed_clone(&self) -> Box<dyn SearchPolicy<A, S>> {
        Box::new(RandomSampler::new())
    }
}
