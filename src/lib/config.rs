use crate::policy::{
    DepthEvaluation, DeterministicSampler, RandomRollout, RandomSampler, SearchPolicy, UcbSampler,
};
use crate::simulation::{Action, NodeState};
use crate::stage::{Stage, Termination};
use crate::sink::DataSink;
use crate::tree::AverageUpdater;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Which sampler the workers run, and its knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SamplerConfig {
    Random,
    Deterministic {
        max_depth: u32,
    },
    Ucb {
        exploration_constant: f32,
        #[serde(default)]
        exploration_random_factor: f32,
        rollout_horizon: u32,
    },
}

impl SamplerConfig {
    pub fn build<A: Action, S: NodeState>(&self) -> Box<dyn SearchPolicy<A, S>> {
        match self {
            SamplerConfig::Random => Box::new(RandomSampler::new()),
            SamplerConfig::Deterministic { max_depth } => {
                Box::new(DeterministicSampler::new(*max_depth))
            }
            SamplerConfig::Ucb {
                exploration_constant,
                exploration_random_factor,
                rollout_horizon,
            } => {
                let evaluation = Arc::new(DepthEvaluation);
                Box::new(UcbSampler::new(
                    *exploration_constant,
                    *exploration_random_factor,
                    evaluation.clone(),
                    Box::new(RandomRollout::new(*rollout_horizon, evaluation)),
                    Arc::new(AverageUpdater),
                ))
            }
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig::Random
    }
}

/// Everything a search run needs besides the problem itself. Missing fields take their defaults,
/// so `{}` is a valid configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub workers: usize,
    pub stage_poll_ms: u64,
    pub state_wait_polls: u32,
    pub state_wait_interval_ms: u64,
    pub sampler: SamplerConfig,
    /// Run in order, each one starting from the first node the previous one returned.
    pub stages: Vec<Termination>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            workers: 4,
            stage_poll_ms: 5,
            state_wait_polls: 200,
            state_wait_interval_ms: 5,
            sampler: SamplerConfig::default(),
            stages: vec![Termination::FixedEpisodes { episodes: 1000 }],
        }
    }
}

impl SearchConfig {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn stage<A: Action, S: NodeState>(
        &self,
        termination: Termination,
        sink: Box<dyn DataSink<A, S>>,
    ) -> Stage<A, S> {
        Stage::new(termination, self.sampler.build(), sink)
            .with_poll_interval(Duration::from_millis(self.stage_poll_ms))
            .with_state_wait(
                self.state_wait_polls,
                Duration::from_millis(self.state_wait_interval_ms),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::corridor::{RunnerState, Thrust};
    use crate::sink::NullSink;

    #[test]
    fn empty_object_is_the_default() {
        assert_eq!(SearchConfig::from_json("{}").unwrap(), SearchConfig::default());
    }

    #[test]
    fn reads_samplers_and_stages() {
        let config = SearchConfig::from_json(
            r#"{
                "workers": 2,
                "sampler": {"type": "ucb", "exploration_constant": 1.4, "rollout_horizon": 30},
                "stages": [
                    {"type": "min_depth", "depth": 3},
                    {"type": "max_depth", "depth": 10, "max_episodes": 5000},
                    {"type": "search_forever"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.stage_poll_ms, 5);
        assert_eq!(
            config.sampler,
            SamplerConfig::Ucb {
                exploration_constant: 1.4,
                exploration_random_factor: 0.0,
                rollout_horizon: 30,
            }
        );
        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.stages[0], Termination::MinDepth { depth: 3 });
        assert_eq!(config.stages[2], Termination::SearchForever);

        let again = SearchConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn unknown_sampler_is_rejected() {
        assert!(SearchConfig::from_json(r#"{"sampler": {"type": "greedy"}}"#).is_err());
    }

    #[test]
    fn builds_stages() {
        let config = SearchConfig {
            sampler: SamplerConfig::Deterministic { max_depth: 4 },
            ..SearchConfig::default()
        };
        let stage = config.stage::<Thrust, RunnerState>(Termination::FullyExplored, Box::new(NullSink));
        assert_eq!(stage.termination(), &Termination::FullyExplored);
    }
}
