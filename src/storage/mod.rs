pub mod state_storage;

pub use state_storage::{
    FileStateStorage, PendingBatch, PendingPhase, PersistentState, StateStorage,
};
