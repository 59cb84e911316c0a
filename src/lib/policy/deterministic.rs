use crate::error::{Result, TreeError};
use crate::policy::{Contention, SearchPolicy, DEFAULT_BACKOFF_CAP_MS};
use crate::simulation::{Action, NodeState, Simulator};
use crate::tree::NodeRef;
use log::debug;

/// Depth first: always takes the first viable child, reserves the first node with untried
/// actions, and expands the first untried action until failure or `max_depth`.
pub struct DeterministicSampler {
    max_depth: u32,
    contention: Contention,
    tree_done: bool,
    expansion_done: bool,
}

impl DeterministicSampler {
    pub fn new(max_depth: u32) -> Self {
        DeterministicSampler {
            max_depth,
            contention: Contention::new(DEFAULT_BACKOFF_CAP_MS),
            tree_done: false,
            expansion_done: false,
        }
    }
}

impl<A: Action, S: NodeState> SearchPolicy<A, S> for DeterministicSampler {
    fn episode_started(&mut self) {
        self.tree_done = false;
        self.expansion_done = false;
    }

    fn tree_policy(&mut self, start: &NodeRef<A, S>) -> Option<NodeRef<A, S>> {
        loop {
            if start.is_fully_explored() {
                return None;
            }
            let mut stack = vec![start.clone()];
            while let Some(node) = stack.pop() {
                if node.is_locked() || node.tree_depth() >= self.max_depth {
                    continue;
                }
                if node.untried_action_count() > 0 {
                    if node.reserve_expansion_rights() {
                        self.contention.reset();
                        return Some(node);
                    }
                    continue;
                }
                stack.extend(node.children().into_iter().filter(|c| c.is_viable()).rev());
            }
            if !self.contention.wait() {
                debug!("deterministic sampler blocked below depth {}", start.tree_depth());
                return None;
            }
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
            .untried_action_by_index(0)
            .ok_or(TreeError::ExpansionContract {
                expected_depth: start.tree_depth() + 1,
                actual_depth: start.tree_depth(),
            })?;
        start.add_child(action)
    }

    fn expansion_policy_action_done(&mut self, current: &NodeRef<A, S>) {
        self.tree_done = false;
        self.expansion_done = current.is_failed()
            || current.untried_action_count() == 0
            || current.tree_depth() >= self.max_depth;
    }

    fn expansion_policy_guard(&self, current: &NodeRef<A, S>) -> bool {
        self.expansion_done || current.tree_depth() >= self.max_depth
    }

    fn rollout_policy(&mut self, _: &NodeRef<A, S>, _: &mut dyn Simulator<A, S>) {}

    fn rollout_policy_guard(&self, _: &NodeRef<A, S>) -> bool {
        true
    }

    fn boxed_clone(&self) -> Box<dyn SearchPolicy<A, S>> {
        Box::new(DeterministicSampler::new(self.max_depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::tests::play_episode;
    use crate::simulation::graph_walk::tests::{binary, problem1, root_of};
    use crate::simulation::graph_walk::GraphWalk;

    #[test]
    fn first_episode_takes_first_actions() {
        let map = problem1();
        let root = root_of(&map);
        let mut walk = GraphWalk::new(map.clone());
        let mut sampler = DeterministicSampler::new(10);
        let end = play_episode(&mut sampler, &root, &mut walk).unwrap();
        // 0 then 0 again falls into n3.
        assert_eq!(end.sequence().unwrap(), vec![0, 0]);
        assert!(end.is_failed());

        // The root still has an untried action, which comes before anything deeper.
        let end = play_episode(&mut sampler, &root, &mut walk).unwrap();
        assert_eq!(end.sequence().unwrap(), vec![1]);
        let end = play_episode(&mut sampler, &root, &mut walk).unwrap();
        assert_eq!(end.sequence().unwrap(), vec![0, 1]);
        assert!(root.is_fully_explored());
        assert!(play_episode(&mut sampler, &root, &mut walk).is_none());
    }

    #[test]
    fn stops_at_the_depth_cap() {
        let map = binary(4);
        let root = root_of(&map);
        let mut walk = GraphWalk::new(map.clone());
        let mut sampler = DeterministicSampler::new(2);
        let end = play_episode(&mut sampler, &root, &mut walk).unwrap();
        assert_eq!(end.tree_depth(), 2);
        for _ in 0..3 {
            assert!(play_episode(&mut sampler, &root, &mut walk).is_some());
        }
        assert_eq!(root.max_branch_depth(), 2);
        assert_eq!(root.count_descendants(), 6);
        assert!(play_episode(&mut sampler, &root, &mut walk).is_none());
    }
}
