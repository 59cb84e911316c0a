use thiserror::Error;

/// Everything that can go wrong while manipulating the shared tree or driving a stage. Failing
/// simulations are not errors; they are recorded on the nodes themselves.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Tried to add a duplicate action node at depth {depth}. Action was: {action}.")]
    DuplicateAction { depth: u32, action: String },

    #[error("Trying to assign the state of a node at depth {depth} after one was already assigned")]
    StateAlreadyAssigned { depth: u32 },

    #[error("Node state at depth {depth} is not assigned yet")]
    StateUnavailable { depth: u32 },

    #[error("The root node has no action leading up to it")]
    RootHasNoAction,

    #[error("Expansion policy returned a node at depth {actual_depth}, expected a new child at depth {expected_depth}")]
    ExpansionContract { expected_depth: u32, actual_depth: u32 },

    #[error("State of the node at depth {depth} was not assigned after {polls} polls")]
    StateTimeout { depth: u32, polls: u32 },

    #[error("Tried to assign a tree stage an invalid number of workers: 0")]
    NoWorkers,

    #[error("Cannot start worker {0} while no root node is assigned")]
    WorkerUnassigned(usize),

    #[error("Could not spawn worker thread: {0}")]
    Spawn(String),

    #[error("Stage thread panicked before returning its workers")]
    StagePanicked,
}

pub type Result<T> = std::result::Result<T, TreeError>;
