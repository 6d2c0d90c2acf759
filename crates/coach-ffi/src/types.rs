use coach_session::{FacadeStatus, InferenceError};

/// Status codes returned by every FFI function.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoachStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorModelNotFound = 2,
    ErrorModelLoad = 3,
    ErrorGenerate = 4,
    ErrorCancelled = 5,
    ErrorBusy = 6,
    ErrorInternal = 7,
}

impl From<&InferenceError> for CoachStatus {
    fn from(e: &InferenceError) -> Self {
        match e {
            InferenceError::ModelNotFound { .. } => CoachStatus::ErrorModelNotFound,
            InferenceError::ModelLoad(_) | InferenceError::ContextCreate(_) => CoachStatus::ErrorModelLoad,
            InferenceError::Encoding(_)
            | InferenceError::ContextOverflow { .. }
            | InferenceError::DecodeStep(_)
            | InferenceError::NotLoaded => CoachStatus::ErrorGenerate,
            InferenceError::Cancelled => CoachStatus::ErrorCancelled,
            InferenceError::Busy => CoachStatus::ErrorBusy,
            InferenceError::WorkerGone => CoachStatus::ErrorInternal,
        }
    }
}

/// Snapshot of the runtime's published state.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoachRuntimeStatus {
    pub is_model_loaded: bool,
    pub is_generating: bool,
    /// 0.0 to 1.0 while loading.
    pub loading_progress: f32,
    /// A failure is recorded; fetch it with `coach_last_error` after the call that failed.
    pub has_error: bool,
}

impl From<&FacadeStatus> for CoachRuntimeStatus {
    fn from(s: &FacadeStatus) -> Self {
        Self {
            is_model_loaded: s.is_model_loaded,
            is_generating: s.is_generating,
            loading_progress: s.loading_progress,
            has_error: s.last_error.is_some(),
        }
    }
}
