//! The shared search tree.
//!
//! Every worker reads and grows the same tree concurrently. Nodes are handed around as
//! [`NodeRef`]s; no operation ever hands out a lock guard, and every cross-node walk goes from
//! child to parent.

mod explore;
mod import;
mod lock;
mod node;
mod untried;
mod view;

pub use import::{import_action_sequences, import_episodes, ImportSummary, RecordedEpisode};
pub use node::{Node, NodeRef};
pub use untried::UntriedActions;
pub use view::{render_tree, NodeSummary, TreeView};

/// Folds a new sample into a node's running value.
pub trait ValueUpdater: Send + Sync {
    /// `visits` already counts the sample being folded in.
    fn update(&self, current: f32, sample: f32, visits: u64) -> f32;
}

/// Running mean of all samples.
pub struct AverageUpdater;

impl ValueUpdater for AverageUpdater {
    fn update(&self, current: f32, sample: f32, visits: u64) -> f32 {
        current + (sample - current) / visits as f32
    }
}

/// The latest sample wins.
pub struct HardSetUpdater;

impl ValueUpdater for HardSetUpdater {
    fn update(&self, _: f32, sample: f32, _: u64) -> f32 {
        sample
    }
}

pub struct MaxUpdater;

impl ValueUpdater for MaxUpdater {
    fn update(&self, current: f32, sample: f32, visits: u64) -> f32 {
        if visits <= 1 {
            sample
        } else {
            current.max(sample)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updaters() {
        let mut avg = 0.0;
        for (i, s) in [2.0, 4.0, 9.0].iter().enumerate() {
            avg = AverageUpdater.update(avg, *s, i as u64 + 1);
        }
        assert!((avg - 5.0).abs() < 1e-6);
        assert_eq!(HardSetUpdater.update(3.0, -1.0, 8), -1.0);
        assert_eq!(MaxUpdater.update(0.0, -2.0, 1), -2.0);
        assert_eq!(MaxUpdater.update(-2.0, -3.0, 2), -2.0);
    }
}
