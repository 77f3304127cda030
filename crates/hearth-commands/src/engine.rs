//! Execution engine for package manager jobs.
//!
//! For every job the engine:
//! 1. Waits for exclusive use of the job's working directory
//! 2. Writes audit context (user, directory, command line) to the channel
//! 3. Spawns the command inside a PTY and streams its output verbatim
//! 4. Enforces the deadline, terminating the process group when it passes
//! 5. Classifies the exit and sends a terminal event

use std::io;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use portable_pty::{ChildKiller, ExitStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::OutputChannel;
use crate::job::{DEFAULT_TIMEOUT, ExecutionJob, ExecutionOutcome};
use crate::pty::{self, PtyProcess};

/// Line sent after a zero exit.
pub const SUCCESS_LINE: &str = "\r\nOperation succeeded!\r\n";

/// Chunks buffered between the PTY reader thread and the forwarder task.
const READ_QUEUE_DEPTH: usize = 64;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline applied to jobs created by `execute`
    pub timeout: Duration,
    /// How long a terminated process may take to exit before it is killed
    pub kill_grace: Duration,
    /// How long to keep reading output after the process exited
    pub drain_grace: Duration,
    pub pty_rows: u16,
    pub pty_cols: u16,
    /// Extra environment for every job
    pub env: Vec<(String, String)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            kill_grace: Duration::from_secs(5),
            drain_grace: Duration::from_millis(500),
            pty_rows: 24,
            pty_cols: 120,
            env: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Final job record and outcome.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub job: ExecutionJob,
    pub outcome: ExecutionOutcome,
}

/// Something that can run a command and stream its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` in `cwd`, streaming to `channel`. Never fails outright;
    /// every problem ends up in the outcome.
    async fn execute(
        &self,
        argv: Vec<String>,
        cwd: PathBuf,
        channel: OutputChannel,
    ) -> ExecutionOutcome;
}

/// How the supervised process ended.
enum Termination {
    Exited(ExitStatus),
    TimedOut,
    WaitFailed(io::Error),
}

/// Supervises package manager subprocesses.
pub struct ExecutionEngine {
    config: EngineConfig,
    /// One lock per working directory
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl ExecutionEngine {
    /// Create a new engine.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a job to completion.
    ///
    /// Dropping the returned future before it resolves terminates the
    /// process group and releases the working directory.
    pub async fn run(&self, mut job: ExecutionJob, channel: &OutputChannel) -> ExecutionReport {
        let key = lock_key(&job.working_directory).await;
        let mut lease = DirectoryLease::new(&self.locks, key);
        lease.acquire(&job).await;

        let outcome = self.run_exclusive(&mut job, channel).await;
        drop(lease);

        self.deliver(&job, channel.finish(outcome.clone())).await;
        ExecutionReport { job, outcome }
    }

    /// Number of directories with an active or queued job.
    pub fn busy_directories(&self) -> usize {
        self.locks.len()
    }

    /// Await a send for at most the drain grace. A consumer that stalls
    /// past it loses the event.
    async fn deliver(&self, job: &ExecutionJob, send: impl Future<Output = bool>) -> bool {
        match tokio::time::timeout(self.config.drain_grace, send).await {
            Ok(sent) => sent,
            Err(_) => {
                debug!(category = "commands", job_id = %job.id, "Output consumer stalled, event dropped");
                false
            }
        }
    }

    async fn run_exclusive(&self, job: &mut ExecutionJob, channel: &OutputChannel) -> ExecutionOutcome {
        let command_line = job.command_line();

        let audit = async {
            channel
                .data(format!("USER: {}\r\n", pty::invoking_user()))
                .await
                && channel
                    .data(format!("DIR: {}\r\n", job.working_directory.display()))
                    .await
                && channel.data(format!("CMD: {}\r\n\r\n", command_line)).await
        };
        self.deliver(job, audit).await;

        let process = match pty::spawn(&job.command, &job.working_directory, &self.config) {
            Ok(process) => process,
            Err(e) => {
                warn!(category = "commands", job_id = %job.id, error = %e, "Failed to start job");
                job.fail();
                return ExecutionOutcome::failed(e.to_string());
            }
        };

        job.mark_running(process.pid);
        info!(
            category = "commands",
            job_id = %job.id,
            pid = ?process.pid,
            cwd = %job.working_directory.display(),
            command = %command_line,
            "Job started"
        );

        match self.supervise(job, process, channel).await {
            Termination::Exited(status) if status.success() => {
                job.finish(0);
                self.deliver(job, channel.data(SUCCESS_LINE)).await;
                info!(category = "commands", job_id = %job.id, "Job succeeded");
                ExecutionOutcome::Succeeded
            }
            Termination::Exited(status) => {
                let code = status.exit_code();
                job.finish(code);
                warn!(category = "commands", job_id = %job.id, exit_code = code, "Job failed");
                ExecutionOutcome::failed(format!("{} failed with exit code {}", command_line, code))
            }
            Termination::TimedOut => {
                job.mark_timed_out();
                warn!(
                    category = "commands",
                    job_id = %job.id,
                    timeout_secs = job.timeout.as_secs(),
                    "Job timed out and was terminated"
                );
                ExecutionOutcome::failed(format!(
                    "{} timed out after {} seconds",
                    command_line,
                    job.timeout.as_secs()
                ))
            }
            Termination::WaitFailed(e) => {
                job.fail();
                warn!(category = "commands", job_id = %job.id, error = %e, "Lost track of job");
                ExecutionOutcome::failed(format!("Failed to wait for {}: {}", command_line, e))
            }
        }
    }

    /// Wait for the process to exit or the deadline to pass. Output is
    /// forwarded by a separate task so a slow consumer never hides the exit.
    async fn supervise(
        &self,
        job: &ExecutionJob,
        process: PtyProcess,
        channel: &OutputChannel,
    ) -> Termination {
        let PtyProcess {
            pid,
            mut child,
            mut reader,
            master,
        } = process;
        let mut guard = KillOnDrop {
            pid,
            killer: child.clone_killer(),
            armed: true,
        };

        let (chunk_tx, chunk_rx) = mpsc::channel::<String>(READ_QUEUE_DEPTH);
        let _reader_task = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                        // blocks while the forwarder is full
                        if chunk_tx.blocking_send(chunk).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    // EIO once the slave side is closed
                    Err(_) => break,
                }
            }
        });

        let (exit_tx, exit_rx) = oneshot::channel();
        let mut forwarder = AbortOnDrop(tokio::spawn(forward_output(
            chunk_rx,
            channel.clone(),
            exit_rx,
            self.config.drain_grace,
        )));
        let mut wait_task = tokio::task::spawn_blocking(move || child.wait());

        let deadline_at = Instant::now() + job.timeout;
        let exit = tokio::select! {
            biased;
            joined = &mut wait_task => Some(joined),
            _ = tokio::time::sleep_until(deadline_at) => None,
        };

        let termination = match exit {
            Some(joined) => {
                let _ = exit_tx.send(());
                let settle = deadline_at.max(Instant::now() + self.config.drain_grace);
                if tokio::time::timeout_at(settle, &mut forwarder.0).await.is_err() {
                    debug!(category = "commands", job_id = %job.id, "Output still streaming after exit, detaching");
                }
                match joined {
                    Ok(Ok(status)) => {
                        guard.armed = false;
                        Termination::Exited(status)
                    }
                    Ok(Err(e)) => Termination::WaitFailed(e),
                    Err(e) => Termination::WaitFailed(io::Error::other(e.to_string())),
                }
            }
            None => {
                // output after the deadline is discarded
                forwarder.0.abort();
                self.terminate(job, &mut guard, &mut wait_task).await;
                Termination::TimedOut
            }
        };

        drop(forwarder);
        drop(master);
        termination
    }

    /// Terminate the process group, escalating to a kill after the grace
    /// period. Returns once the process has been reaped.
    async fn terminate(
        &self,
        job: &ExecutionJob,
        guard: &mut KillOnDrop,
        wait_task: &mut JoinHandle<io::Result<ExitStatus>>,
    ) {
        let signalled = guard.pid.map(pty::terminate_group).unwrap_or(false);
        if !signalled {
            if let Err(e) = guard.killer.kill() {
                debug!(category = "commands", job_id = %job.id, error = %e, "Kill failed");
            }
        }

        if tokio::time::timeout(self.config.kill_grace, &mut *wait_task)
            .await
            .is_err()
        {
            warn!(
                category = "commands",
                job_id = %job.id,
                pid = ?guard.pid,
                "Process ignored termination, killing"
            );
            if let Some(pid) = guard.pid {
                pty::kill_group(pid);
            }
            let _ = guard.killer.kill();
            let _ = wait_task.await;
        }
        guard.armed = false;
    }
}

/// Forward PTY output to the consumer. Before the exit signal every chunk
/// is delivered; afterwards forwarding stops once the output goes quiet
/// for `drain_grace`, so a background process holding the PTY open does
/// not keep the job alive.
async fn forward_output(
    mut chunks: mpsc::Receiver<String>,
    channel: OutputChannel,
    mut exited: oneshot::Receiver<()>,
    drain_grace: Duration,
) {
    loop {
        tokio::select! {
            chunk = chunks.recv() => match chunk {
                Some(chunk) => {
                    if !channel.data(chunk).await {
                        return;
                    }
                }
                None => return,
            },
            _ = &mut exited => break,
        }
    }

    while let Ok(Some(chunk)) = tokio::time::timeout(drain_grace, chunks.recv()).await {
        if !channel.data(chunk).await {
            return;
        }
    }
}

/// Exclusive use of a working directory. Dropping it releases the lock
/// and forgets the directory once nobody else is queued on it.
struct DirectoryLease<'a> {
    locks: &'a DashMap<PathBuf, Arc<Mutex<()>>>,
    key: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> DirectoryLease<'a> {
    fn new(locks: &'a DashMap<PathBuf, Arc<Mutex<()>>>, key: PathBuf) -> Self {
        Self {
            locks,
            key,
            guard: None,
        }
    }

    async fn acquire(&mut self, job: &ExecutionJob) {
        let lock = self
            .locks
            .entry(self.key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                info!(
                    category = "commands",
                    job_id = %job.id,
                    cwd = %self.key.display(),
                    "Waiting for another job in the same directory"
                );
                lock.lock_owned().await
            }
        };
        self.guard = Some(guard);
    }
}

impl Drop for DirectoryLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Kills the process group when dropped while still armed.
struct KillOnDrop {
    pid: Option<u32>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    /// Cleared once the process has been reaped
    armed: bool,
}

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(pid) = self.pid {
            pty::kill_group(pid);
        }
        let _ = self.killer.kill();
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[async_trait]
impl CommandRunner for ExecutionEngine {
    async fn execute(
        &self,
        argv: Vec<String>,
        cwd: PathBuf,
        channel: OutputChannel,
    ) -> ExecutionOutcome {
        let job = ExecutionJob::new(argv, cwd).with_timeout(self.config.timeout);
        self.run(job, &channel).await.outcome
    }
}

/// Directory lock key; symlinked spellings of a path share one lock.
async fn lock_key(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}
