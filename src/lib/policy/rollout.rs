use crate::simulation::{Action, NodeState, Simulator};
use crate::tree::{Node, NodeRef};
use log::trace;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;

/// Scores a node. Higher is better.
pub trait EvaluationFunction<A, S>: Send + Sync {
    fn value(&self, node: &Node<A, S>) -> f32;
}

/// How deep the node is. Failing early scores low.
pub struct DepthEvaluation;

impl<A: Action, S: NodeState> EvaluationFunction<A, S> for DepthEvaluation {
    fn value(&self, node: &Node<A, S>) -> f32 {
        node.tree_depth() as f32
    }
}

/// Adapts a closure into an evaluation function.
pub struct FnEvaluation<F>(pub F);

impl<A, S, F> EvaluationFunction<A, S> for FnEvaluation<F>
where
    F: Fn(&Node<A, S>) -> f32 + Send + Sync,
{
    fn value(&self, node: &Node<A, S>) -> f32 {
        (self.0)(node)
    }
}

/// Plays on from a node outside of the shared tree and scores where it ends up.
pub trait RolloutPolicy<A, S>: Send {
    fn rollout(&mut self, start: &NodeRef<A, S>, simulator: &mut dyn Simulator<A, S>) -> f32;
    fn boxed_clone(&self) -> Box<dyn RolloutPolicy<A, S>>;
}

/// Random actions for up to `horizon` steps or until the simulation fails. The path is kept as
/// unlinked nodes hanging off `start`, so the shared tree never sees it, even where the path
/// retraces a branch that is already in the tree.
pub struct RandomRollout<A, S> {
    horizon: u32,
    evaluation: Arc<dyn EvaluationFunction<A, S>>,
    rng: SmallRng,
}

impl<A: Action, S: NodeState> RandomRollout<A, S> {
    pub fn new(horizon: u32, evaluation: Arc<dyn EvaluationFunction<A, S>>) -> Self {
        RandomRollout {
            horizon,
            evaluation,
            rng: SmallRng::from_entropy(),
        }
    }
}

impl<A: Action, S: NodeState> RolloutPolicy<A, S> for RandomRollout<A, S> {
    fn rollout(&mut self, start: &NodeRef<A, S>, simulator: &mut dyn Simulator<A, S>) -> f32 {
        let mut node = start.clone();
        for _ in 0..self.horizon {
            if simulator.is_failed() {
                break;
            }
            let candidates = node.generator().candidates(&node);
            let action = match candidates.random(&mut self.rng) {
                Some(a) => a.clone(),
                None => break,
            };
            simulator.step(&action);
            node = node.add_rollout_child(action, simulator.current_state());
        }
        trace!(
            "rollout from depth {} ended at depth {}",
            start.tree_depth(),
            node.tree_depth()
        );
        self.evaluation.value(&node)
    }

    fn boxed_clone(&self) -> Box<dyn RolloutPolicy<A, S>> {
        Box::new(RandomRollout::new(self.horizon, self.evaluation.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::corridor::{distance, thrusts, Corridor};
    use crate::simulation::fixtures::Flag;
    use crate::simulation::FixedActions;

    // Never fails, so only the horizon ends a rollout.
    #[derive(Default)]
    struct Endless {
        steps: u64,
    }

    impl Simulator<u8, Flag> for Endless {
        fn reset_world(&mut self) {
            self.steps = 0;
        }

        fn step(&mut self, _: &u8) {
            self.steps += 1;
        }

        fn current_state(&self) -> Flag {
            Flag(false)
        }

        fn is_failed(&self) -> bool {
            false
        }

        fn timesteps_this_episode(&self) -> u64 {
            self.steps
        }
    }

    #[test]
    fn rollout_stays_out_of_the_tree() {
        let root = Node::new_root(Corridor::initial_state(), Arc::new(thrusts()));
        let mut corridor = Corridor::new(3);
        let mut rollout = RandomRollout::new(20, Arc::new(DepthEvaluation));
        let score = rollout.rollout(&root, &mut corridor);
        assert!(score >= 1.0 && score <= 20.0);
        assert_eq!(root.child_count(), 0);
        assert_eq!(root.untried_action_count(), 3);
        assert_eq!(corridor.timesteps_this_episode() as f32, score);
    }

    #[test]
    fn rollout_runs_past_linked_children() {
        let root: NodeRef<u8, Flag> =
            Node::new_root(Flag(false), Arc::new(FixedActions::new(vec![0u8])));
        root.add_child_with_state(0, Flag(false)).unwrap();
        let mut sim = Endless::default();
        let mut rollout = RandomRollout::new(20, Arc::new(DepthEvaluation));
        assert_eq!(rollout.rollout(&root, &mut sim), 20.0);
        assert_eq!(sim.steps, 20);
        assert_eq!(root.child_count(), 1);
        assert_eq!(root.descendant_count(), 1);
    }

    #[test]
    fn closures_evaluate() {
        let root = Node::new_root(Corridor::initial_state(), Arc::new(thrusts()));
        let mut moved = Corridor::initial_state();
        moved.position = 4;
        let c = root.add_child_with_state(1, moved).unwrap();
        let eval = FnEvaluation(distance);
        assert_eq!(eval.value(&*c), 4.0);
        assert_eq!(DepthEvaluation.value(&*c), 1.0);
    }
}
