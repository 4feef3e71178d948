use thiserror::Error;

/// Errors a caller of the job API can act on.
///
/// Per-device failures are never represented here; they are data on
/// [`crate::pipeline::DeviceRecord`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("state error: {0}")]
    State(String),
}

impl JobError {
    pub fn validation(msg: impl Into<String>) -> Self {
        JobError::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        JobError::State(msg.into())
    }
}
