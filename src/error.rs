/// Error types for the edit session core
///
/// Every failure is terminal for the attempt that produced it: a failed open
/// lands the session back in Idle, a failed save back in Ready. Nothing is
/// retried automatically.
use thiserror::Error;

use crate::state::machine::SessionPhase;

#[derive(Debug, Error)]
pub enum EditorError {
    /// Operation requested from a state that forbids it
    #[error("can't {operation}: session is {phase:?}")]
    InvalidState {
        operation: &'static str,
        phase: SessionPhase,
    },

    /// Asset reference did not resolve to a stored asset
    #[error("asset not found: {0}")]
    NotFound(String),

    /// The store refuses content edits for this asset
    #[error("asset can't be edited")]
    NotEditable,

    /// The full-resolution editing input is no longer available
    #[error("can't save, no input")]
    MissingInput,

    /// The commit target no longer exists in the store
    #[error("can't perform changes, no asset")]
    MissingAsset,

    /// Atomic write of the rendered output failed
    #[error("error when writing file: {0}")]
    WriteFailure(std::io::Error),

    /// The store rejected the transactional commit
    #[error("error saving changes: {0}")]
    CommitFailure(String),

    /// Completion arrived after session teardown; no state was touched
    #[error("session has been torn down")]
    StaleSession,

    /// Stored adjustment record could not be decoded
    #[error("corrupt adjustment record: {0}")]
    CorruptData(serde_json::Error),

    /// Catalog database error
    #[error("catalog database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// A background task failed to run to completion
    #[error("task join error: {0}")]
    Background(String),
}
