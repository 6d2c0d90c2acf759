use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the session and the facade.
///
/// Cloneable so the facade can publish the last error while also handing it
/// back to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    #[error("model artifact not found (searched {})", display_paths(.searched))]
    ModelNotFound { searched: Vec<PathBuf> },

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("failed to create decoding context: {0}")]
    ContextCreate(String),

    #[error("failed to encode prompt: {0}")]
    Encoding(String),

    #[error("prompt needs {needed} tokens but the context holds {budget}")]
    ContextOverflow { needed: usize, budget: usize },

    #[error("decode step failed: {0}")]
    DecodeStep(String),

    #[error("generation cancelled")]
    Cancelled,

    #[error("a generation is already in flight")]
    Busy,

    #[error("model is not loaded")]
    NotLoaded,

    #[error("inference worker has shut down")]
    WorkerGone,
}

impl InferenceError {
    /// Raised while bringing the model up; the session is left unloaded.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            InferenceError::ModelNotFound { .. }
                | InferenceError::ModelLoad(_)
                | InferenceError::ContextCreate(_)
        )
    }

    /// The same request may succeed if retried, possibly with a shorter
    /// prompt. Load errors need a new artifact or configuration first.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            InferenceError::ContextOverflow { .. }
                | InferenceError::DecodeStep(_)
                | InferenceError::Cancelled
                | InferenceError::Busy
                | InferenceError::NotLoaded
        )
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, InferenceError>;
