//! Execution errors.

/// Failures that prevent a job from reaching the `Running` state.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Failed to allocate pseudo-terminal: {0}")]
    Pty(String),

    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },
}
