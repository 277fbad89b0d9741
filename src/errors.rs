use thiserror::Error;

/// Failure taxonomy for session operations. Document file I/O keeps using
/// `anyhow` at the load/save boundary; everything the engine itself can
/// reject or recover from is typed here.
#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    #[error("material '{name}' no longer exists in the document")]
    MissingReference { name: String },

    #[error("corrupt snapshot data on node '{node}': {reason}")]
    CorruptSnapshot { node: String, reason: String },

    #[error("revert finished with {failed} node(s) left in override state")]
    PartialRevert { failed: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OverrideError>;
