use crate::counters;
use crate::error::Result;
use crate::simulation::{Action, NodeState, Simulator};
use crate::tree::node::NodeRef;
use log::info;
use parking_lot::{const_mutex, Mutex};

/// One played episode: the actions taken and the state observed after each of them.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEpisode<A, S> {
    pub actions: Vec<A>,
    pub states: Vec<S>,
}

impl<A, S> Default for RecordedEpisode<A, S> {
    fn default() -> Self {
        RecordedEpisode {
            actions: vec![],
            states: vec![],
        }
    }
}

impl<A, S> RecordedEpisode<A, S> {
    pub fn len(&self) -> usize {
        self.actions.len().min(self.states.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub episodes: usize,
    pub nodes_created: usize,
}

// One import at a time, process wide. Imports may still overlap with live exploration.
static IMPORTING: Mutex<()> = const_mutex(());

/// Grafts recorded episodes onto the tree below `root`, reusing nodes wherever an episode
/// retraces an existing branch. Fully explored flags are reconciled afterwards.
pub fn import_episodes<A: Action, S: NodeState>(
    root: &NodeRef<A, S>,
    episodes: &[RecordedEpisode<A, S>],
) -> Result<ImportSummary> {
    let _guard = IMPORTING.lock();
    let mut summary = ImportSummary::default();
    for episode in episodes {
        let mut current = root.clone();
        for (action, state) in episode.actions.iter().zip(episode.states.iter()) {
            let (next, created) = current.child_or_import(action.clone(), state.clone())?;
            if created {
                summary.nodes_created += 1;
            }
            current = next;
        }
        summary.episodes += 1;
        counters::global().episode_imported();
    }
    root.propagate_fully_explored_complete();
    info!(
        "Imported {} episodes, {} new nodes",
        summary.episodes, summary.nodes_created
    );
    Ok(summary)
}

/// Like [`import_episodes`] but only the actions are known. States are regenerated by replaying
/// each sequence on `simulator` from a reset world, stopping at the first failure.
pub fn import_action_sequences<A: Action, S: NodeState>(
    root: &NodeRef<A, S>,
    sequences: &[Vec<A>],
    simulator: &mut dyn Simulator<A, S>,
) -> Result<ImportSummary> {
    let episodes = sequences
        .iter()
        .map(|actions| {
            simulator.reset_world();
            let mut episode = RecordedEpisode::default();
            for a in actions {
                if simulator.is_failed() {
                    break;
                }
                simulator.step(a);
                episode.actions.push(a.clone());
                episode.states.push(simulator.current_state());
            }
            episode
        })
        .collect::<Vec<_>>();
    import_episodes(root, &episodes)
}
