//! Execution job data structures.
//!
//! A job moves through `Pending -> Running -> {Succeeded, Failed, TimedOut}`.
//! Terminal states are final; late transitions are ignored.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
pub type JobId = String;

/// Default deadline for a package manager job.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Job state tracking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Created, waiting for its working directory or for spawn
    Pending,
    /// Process spawned
    Running,
    /// Exited with code 0 before the deadline
    Succeeded,
    /// Exited non-zero, or never started (no exit code)
    Failed { exit_code: Option<u32> },
    /// Deadline elapsed and the process was terminated
    TimedOut,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed { .. } | JobState::TimedOut
        )
    }

    /// Check if the job succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Succeeded)
    }
}

/// Result reported to the caller of a job.
///
/// The exit code is not part of the outcome; callers only
/// distinguish success from failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed(String),
}

impl ExecutionOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutionOutcome::Failed(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }

    /// Failure message, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Succeeded => None,
            ExecutionOutcome::Failed(message) => Some(message),
        }
    }
}

/// One supervised subprocess invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionJob {
    /// Unique job ID
    pub id: JobId,
    /// Argument vector, program first
    pub command: Vec<String>,
    /// Working directory of the process
    pub working_directory: PathBuf,
    /// Current state
    pub state: JobState,
    /// Deadline measured from spawn
    pub timeout: Duration,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Spawn timestamp
    pub started_at: Option<DateTime<Utc>>,
    /// `started_at + timeout`
    pub deadline: Option<DateTime<Utc>>,
    /// Time the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// Process ID once spawned
    pub pid: Option<u32>,
}

impl ExecutionJob {
    /// Create a new pending job.
    pub fn new(command: Vec<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command,
            working_directory: working_directory.into(),
            state: JobState::Pending,
            timeout: DEFAULT_TIMEOUT,
            created_at: Utc::now(),
            started_at: None,
            deadline: None,
            finished_at: None,
            pid: None,
        }
    }

    /// Set the deadline duration.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program name (first argument).
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("")
    }

    /// Full command line for display, arguments with spaces quoted.
    pub fn command_line(&self) -> String {
        self.command
            .iter()
            .map(|arg| {
                if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                    format!("\"{}\"", arg)
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `Pending -> Running`.
    pub fn mark_running(&mut self, pid: Option<u32>) -> bool {
        if self.state != JobState::Pending {
            return false;
        }
        let now = Utc::now();
        self.state = JobState::Running;
        self.pid = pid;
        self.started_at = Some(now);
        self.deadline = chrono::Duration::from_std(self.timeout)
            .ok()
            .map(|timeout| now + timeout);
        true
    }

    /// `Running -> Succeeded | Failed` from an exit code.
    pub fn finish(&mut self, exit_code: u32) -> bool {
        if self.state != JobState::Running {
            return false;
        }
        let state = if exit_code == 0 {
            JobState::Succeeded
        } else {
            JobState::Failed {
                exit_code: Some(exit_code),
            }
        };
        self.transition(state)
    }

    /// Fail without an exit code (spawn or wait failure).
    pub fn fail(&mut self) -> bool {
        self.transition(JobState::Failed { exit_code: None })
    }

    /// `Running -> TimedOut`.
    pub fn mark_timed_out(&mut self) -> bool {
        if self.state != JobState::Running {
            return false;
        }
        self.transition(JobState::TimedOut)
    }

    fn transition(&mut self, state: JobState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = state;
        self.finished_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ExecutionJob {
        ExecutionJob::new(
            vec!["npm".to_string(), "install".to_string()],
            "/var/lib/hearth",
        )
    }

    #[test]
    fn test_state_is_terminal() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed { exit_code: Some(1) }.is_terminal());
        assert!(JobState::TimedOut.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn test_job_creation() {
        let job = job();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.timeout, DEFAULT_TIMEOUT);
        assert_eq!(job.program(), "npm");
        assert!(job.started_at.is_none());
        assert!(job.deadline.is_none());
    }

    #[test]
    fn test_running_sets_deadline() {
        let mut job = job().with_timeout(Duration::from_secs(10));
        assert!(job.mark_running(Some(42)));

        let started = job.started_at.unwrap();
        assert_eq!(job.deadline.unwrap() - started, chrono::Duration::seconds(10));
        assert_eq!(job.pid, Some(42));

        // only once
        assert!(!job.mark_running(Some(43)));
        assert_eq!(job.pid, Some(42));
    }

    #[test]
    fn test_exit_classification() {
        let mut ok = job();
        ok.mark_running(None);
        assert!(ok.finish(0));
        assert_eq!(ok.state, JobState::Succeeded);

        let mut bad = job();
        bad.mark_running(None);
        assert!(bad.finish(127));
        assert_eq!(bad.state, JobState::Failed { exit_code: Some(127) });
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job();
        job.mark_running(None);
        assert!(job.mark_timed_out());

        // a late exit after the kill does not rewrite the state
        assert!(!job.finish(0));
        assert!(!job.fail());
        assert_eq!(job.state, JobState::TimedOut);
    }

    #[test]
    fn test_cannot_finish_pending_job() {
        let mut job = job();
        assert!(!job.finish(0));
        assert!(!job.mark_timed_out());
        assert!(job.fail());
        assert_eq!(job.state, JobState::Failed { exit_code: None });
    }

    #[test]
    fn test_command_line_quotes_spaces() {
        let job = ExecutionJob::new(
            vec!["sh".into(), "-c".into(), "echo hi".into()],
            "/tmp",
        );
        assert_eq!(job.command_line(), "sh -c \"echo hi\"");
    }

    #[test]
    fn test_outcome_serialization() {
        let failed = ExecutionOutcome::failed("boom");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["message"], "boom");
        assert_eq!(failed.error(), Some("boom"));
        assert!(ExecutionOutcome::Succeeded.error().is_none());
    }
}
