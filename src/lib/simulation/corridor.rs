use crate::simulation::{FixedActions, NodeState, Simulator};
use crate::tree::Node;

pub type Thrust = i32;

#[derive(Clone, Debug, PartialEq)]
pub struct RunnerState {
    pub position: i32,
    pub velocity: i32,
    pub failed: bool,
}

impl NodeState for RunnerState {
    fn is_failed(&self) -> bool {
        self.failed
    }
}

/// A runner in a one-dimensional corridor. Each tick the thrust is added to the velocity and the
/// velocity to the position. The runner trips when moving faster than `max_speed` in either
/// direction and falls when backing out of the entrance.
pub struct Corridor {
    max_speed: i32,
    state: RunnerState,
    timesteps: u64,
}

impl Corridor {
    pub fn new(max_speed: i32) -> Self {
        Corridor {
            max_speed,
            state: Self::initial_state(),
            timesteps: 0,
        }
    }

    pub fn initial_state() -> RunnerState {
        RunnerState {
            position: 0,
            velocity: 0,
            failed: false,
        }
    }
}

impl Simulator<Thrust, RunnerState> for Corridor {
    fn reset_world(&mut self) {
        self.state = Self::initial_state();
        self.timesteps = 0;
    }

    fn step(&mut self, thrust: &Thrust) {
        if self.state.failed {
            return;
        }
        self.timesteps += 1;
        self.state.velocity += thrust;
        self.state.position += self.state.velocity;
        self.state.failed = self.state.velocity.abs() > self.max_speed || self.state.position < 0;
    }

    fn current_state(&self) -> RunnerState {
        self.state.clone()
    }

    fn is_failed(&self) -> bool {
        self.state.failed
    }

    fn timesteps_this_episode(&self) -> u64 {
        self.timesteps
    }
}

pub fn thrusts() -> FixedActions<Thrust> {
    FixedActions::new(vec![-1, 0, 1])
}

/// Distance covered, or zero while the state is unknown.
pub fn distance(node: &Node<Thrust, RunnerState>) -> f32 {
    node.state().map(|s| s.position as f32).unwrap_or(0.0)
}
