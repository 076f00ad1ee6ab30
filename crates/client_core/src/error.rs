use shared::{domain::StepId, error::ApiError};
use thiserror::Error;

pub const STEP_UPDATE_FALLBACK_MESSAGE: &str = "Could not update step";

/// Hard failures while projecting a snapshot; the whole channel collection is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("lesson {lesson} lists step {step} more than once")]
    DuplicateStep { lesson: String, step: StepId },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("read channel transport failure: {0}")]
    Transport(String),
    #[error("{}", .0.message)]
    Api(ApiError),
    #[error("malformed read channel payload: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompleteStepError {
    #[error("{}", .0.message)]
    Api(ApiError),
    #[error("step completion transport failure: {0}")]
    Transport(String),
    #[error("malformed step completion response: {0}")]
    Decode(String),
    #[error("step completion service is unavailable")]
    Unavailable,
}

impl CompleteStepError {
    /// Message supplied by the server, if the failure carried one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Api(err) if !err.message.trim().is_empty() => Some(err.message.as_str()),
            _ => None,
        }
    }

    pub fn user_message(&self) -> &str {
        self.server_message().unwrap_or(STEP_UPDATE_FALLBACK_MESSAGE)
    }
}

impl From<SourceError> for CompleteStepError {
    fn from(value: SourceError) -> Self {
        match value {
            SourceError::Transport(message) => Self::Transport(message),
            SourceError::Api(err) => Self::Api(err),
            SourceError::Decode(message) => Self::Decode(message),
        }
    }
}

/// Error retained in the view-state for display.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl ProgressError {
    pub fn display_message(&self) -> String {
        match self {
            Self::Source(SourceError::Api(err)) => err.message.clone(),
            other => other.to_string(),
        }
    }
}
