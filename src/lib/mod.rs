//! Concurrent exploration of the tree of action sequences a simulator can play.
//!
//! A search runs as a sequence of [`stage::Stage`]s over a pool of [`worker::Worker`]s. Each
//! worker owns a simulator and repeatedly plays episodes chosen by a [`policy::SearchPolicy`],
//! growing one shared [`tree::Node`] tree that every worker reads and extends at the same time.
//! Subtrees that have nothing left to try are marked fully explored and never revisited.

pub mod config;
pub mod counters;
pub mod error;
pub mod policy;
pub mod simulation;
pub mod sink;
pub mod stage;
pub mod tree;
pub mod worker;

pub use config::{SamplerConfig, SearchConfig};
pub use error::{Result, TreeError};
pub use simulation::{ActionGenerator, NodeState, Simulator};
pub use stage::{Stage, StageResults, Termination};
pub use tree::{Node, NodeRef};
pub use worker::{Worker, WorkerPool};
