use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide tallies shared by every tree, worker and stage. They only ever grow, except
/// through [`reset`], which binaries call once at startup.
pub struct Counters {
    nodes_created: AtomicU64,
    nodes_imported: AtomicU64,
    episodes_imported: AtomicU64,
    episodes_played: AtomicU64,
    timesteps_simulated: AtomicU64,
}

static COUNTERS: Counters = Counters {
    nodes_created: AtomicU64::new(0),
    nodes_imported: AtomicU64::new(0),
    episodes_imported: AtomicU64::new(0),
    episodes_played: AtomicU64::new(0),
    timesteps_simulated: AtomicU64::new(0),
};

pub fn global() -> &'static Counters {
    &COUNTERS
}

pub fn reset() {
    COUNTERS.nodes_created.store(0, Ordering::SeqCst);
    COUNTERS.nodes_imported.store(0, Ordering::SeqCst);
    COUNTERS.episodes_imported.store(0, Ordering::SeqCst);
    COUNTERS.episodes_played.store(0, Ordering::SeqCst);
    COUNTERS.timesteps_simulated.store(0, Ordering::SeqCst);
}

impl Counters {
    pub(crate) fn node_created(&self) {
        self.nodes_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn node_imported(&self) {
        self.nodes_imported.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn episode_imported(&self) {
        self.episodes_imported.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn episode_played(&self, timesteps: u64) {
        self.episodes_played.fetch_add(1, Ordering::SeqCst);
        self.timesteps_simulated
            .fetch_add(timesteps, Ordering::SeqCst);
    }

    pub fn nodes_created(&self) -> u64 {
        self.nodes_created.load(Ordering::Relaxed)
    }

    pub fn nodes_imported(&self) -> u64 {
        self.nodes_imported.load(Ordering::Relaxed)
    }

    /// Imported plus created.
    pub fn total_nodes(&self) -> u64 {
        self.nodes_created() + self.nodes_imported()
    }

    pub fn episodes_imported(&self) -> u64 {
        self.episodes_imported.load(Ordering::Relaxed)
    }

    pub fn episodes_played(&self) -> u64 {
        self.episodes_played.load(Ordering::SeqCst)
    }

    pub fn timesteps_simulated(&self) -> u64 {
        self.timesteps_simulated.load(Ordering::SeqCst)
    }
}

impl Display for Counters {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{nodes: {} (imported {}), episodes: {} (imported {}), timesteps: {}}}",
            self.total_nodes(),
            self.nodes_imported(),
            self.episodes_played(),
            self.episodes_imported(),
            self.timesteps_simulated()
        )
    }
}
