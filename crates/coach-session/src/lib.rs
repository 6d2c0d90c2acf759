//! `coach-session` - turns a model directory into coaching replies.
//!
//! [`ModelSession`] owns the loaded model, its decoding context and sampler
//! and runs the generation loop. [`InferenceFacade`] puts a session on a
//! dedicated worker thread and exposes an async API plus published status.

pub mod config;
pub mod error;
pub mod facade;
pub mod prompt;
pub mod session;

pub use coach_model::{Batch as BatchBuffer, BatchFull};
pub use coach_sampler::{SamplerConfig, SeedPolicy};
pub use config::{SessionConfig, DEFAULT_MODEL_CANDIDATES, DEFAULT_SYSTEM_INSTRUCTION};
pub use error::{InferenceError, Result};
pub use facade::{FacadeStatus, InferenceFacade, UNAVAILABLE_MESSAGE};
pub use prompt::{PromptBuilder, Role, Turn};
pub use session::{FinishReason, Generation, ModelSession, SessionState};
pub use tokio_util::sync::CancellationToken;
