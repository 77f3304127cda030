//! Supervised package manager commands.
//!
//! Provides:
//! - Execution job data structures and their state machine
//! - Bounded output channels with an explicit overflow policy
//! - The execution engine: PTY spawn, streaming, deadline, exit classification
//! - Per-directory serialization of mutating jobs
//!
//! The engine knows nothing about plugins or catalogs. Callers observe the
//! returned outcome and decide what to refresh.

pub mod channel;
pub mod engine;
pub mod error;
pub mod job;
mod pty;

// Re-exports
pub use channel::{OutputChannel, OutputEvent, OutputReceiver, OverflowPolicy, text_of};
pub use engine::{CommandRunner, EngineConfig, ExecutionEngine, ExecutionReport};
pub use error::ExecutionError;
pub use job::{ExecutionJob, ExecutionOutcome, JobId, JobState};
pub use pty::invoking_user;
