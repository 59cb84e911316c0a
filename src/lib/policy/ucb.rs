use crate::error::{Result, TreeError};
use crate::policy::{
    Contention, EvaluationFunction, RolloutPolicy, SearchPolicy, DEFAULT_BACKOFF_CAP_MS,
};
use crate::simulation::{Action, NodeState, Simulator};
use crate::tree::{NodeRef, ValueUpdater};
use log::debug;
use num::ToPrimitive;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use std::sync::Arc;

/// Upper confidence bound sampler. Descends by
/// `value + c * sqrt(2 ln(parent visits) / child visits)`, trying unvisited children first,
/// expands a single node, rolls out from it and backs the score up to the root.
///
/// Every copy draws its own `c` uniformly from
/// `[exploration_constant, exploration_constant + exploration_random_factor)`, so parallel
/// workers do not all chase the same branch.
pub struct UcbSampler<A, S> {
    exploration_constant: f32,
    exploration_random_factor: f32,
    c: f32,
    evaluation: Arc<dyn EvaluationFunction<A, S>>,
    rollout: Box<dyn RolloutPolicy<A, S>>,
    updater: Arc<dyn ValueUpdater>,
    rng: SmallRng,
    contention: Contention,
    tree_done: bool,
    expansion_done: bool,
    rollout_done: bool,
}

impl<A: Action, S: NodeState> UcbSampler<A, S> {
    pub fn new(
        exploration_constant: f32,
        exploration_random_factor: f32,
        evaluation: Arc<dyn EvaluationFunction<A, S>>,
        rollout: Box<dyn RolloutPolicy<A, S>>,
        updater: Arc<dyn ValueUpdater>,
    ) -> Self {
        let mut rng = SmallRng::from_entropy();
        let c = exploration_random_factor * Uniform::new(0.0f32, 1.0).sample(&mut rng)
            + exploration_constant;
        UcbSampler {
            exploration_constant,
            exploration_random_factor,
            c,
            evaluation,
            rollout,
            updater,
            rng,
            contention: Contention::new(DEFAULT_BACKOFF_CAP_MS),
            tree_done: false,
            expansion_done: false,
            rollout_done: false,
        }
    }

    pub fn exploration(&self) -> f32 {
        self.c
    }

    fn best_child(&self, node: &NodeRef<A, S>) -> Option<NodeRef<A, S>> {
        let parent_visits = node.visit_count().to_f32().unwrap_or(0.0).max(1.0);
        let mut best = None;
        let mut best_score = f32::NEG_INFINITY;
        for child in node.children() {
            if !child.is_viable() {
                continue;
            }
            let visits = child.visit_count().to_f32().unwrap_or(0.0);
            let score = if visits == 0.0 {
                f32::INFINITY
            } else {
                child.value() + self.c * (2.0 * parent_visits.ln() / visits).sqrt()
            };
            if best.is_none() || score > best_score {
                best_score = score;
                best = Some(child);
            }
        }
        best
    }

    fn propagate_score(&self, from: &NodeRef<A, S>, score: f32) {
        from.update_value(score, self.updater.as_ref());
        let mut next = from.parent();
        while let Some(node) = next {
            node.update_value(score, self.updater.as_ref());
            next = node.parent();
        }
    }
}

impl<A: Action, S: NodeState> SearchPolicy<A, S> for UcbSampler<A, S> {
    fn episode_started(&mut self) {
        self.tree_done = false;
        self.expansion_done = false;
        self.rollout_done = false;
    }

    fn tree_policy(&mut self, start: &NodeRef<A, S>) -> Option<NodeRef<A, S>> {
        loop {
            if start.is_fully_explored() {
                return None;
            }
            let mut node = start.clone();
            let found = loop {
                if node.is_locked() {
                    break None;
                }
                if node.untried_action_count() > 0 {
                    break Some(node);
                }
                match self.best_child(&node) {
                    Some(c) => node = c,
                    None => break None,
                }
            };
            if let Some(n) = found {
                if n.reserve_expansion_rights() {
                    self.contention.reset();
                    return Some(n);
                }
            }
            if !self.contention.wait() {
                debug!("ucb sampler found nothing to claim below depth {}", start.tree_depth());
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
            .untried_action_on_distribution(&mut self.rng)
            .ok_or(TreeError::ExpansionContract {
                expected_depth: start.tree_depth() + 1,
                actual_depth: start.tree_depth(),
            })?;
        start.add_child(action)
    }

    fn expansion_policy_action_done(&mut self, current: &NodeRef<A, S>) {
        self.tree_done = false;
        self.expansion_done = true;
        if current.is_failed() {
            self.rollout_done = true;
            let score = self.evaluation.value(current);
            self.propagate_score(current, score);
        } else {
            self.rollout_done = false;
        }
    }

    fn expansion_policy_guard(&self, _: &NodeRef<A, S>) -> bool {
        self.expansion_done
    }

    fn rollout_policy(&mut self, start: &NodeRef<A, S>, simulator: &mut dyn Simulator<A, S>) {
        if !start.is_failed() {
            let score = self.rollout.rollout(start, simulator);
            self.propagate_score(start, score);
        }
        self.rollout_done = true;
    }

    fn rollout_policy_guard(&self, _: &NodeRef<A, S>) -> bool {
        self.rollout_done
    }

    fn boxed_clone(&self) -> Box<dyn SearchPolicy<A, S>> {
        Box::new(UcbSampler::new(
            self.exploration_constant,
            self.exploration_random_factor,
            self.evaluation.clone(),
            self.rollout.boxed_clone(),
            self.updater.clone(),
        ))
    }
}
