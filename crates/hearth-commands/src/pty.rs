//! Pseudo-terminal process plumbing.

use std::io::Read;
use std::path::Path;

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};

use crate::engine::EngineConfig;
use crate::error::ExecutionError;

/// A child attached to a PTY.
pub(crate) struct PtyProcess {
    pub pid: Option<u32>,
    pub child: Box<dyn Child + Send + Sync>,
    pub reader: Box<dyn Read + Send>,
    /// Held so the PTY stays open until the job is finished.
    pub master: Box<dyn MasterPty + Send>,
}

/// Spawn `argv` inside a fresh PTY.
pub(crate) fn spawn(
    argv: &[String],
    cwd: &Path,
    config: &EngineConfig,
) -> Result<PtyProcess, ExecutionError> {
    let (program, args) = argv.split_first().ok_or(ExecutionError::EmptyCommand)?;

    let pair = native_pty_system()
        .openpty(PtySize {
            rows: config.pty_rows,
            cols: config.pty_cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| ExecutionError::Pty(e.to_string()))?;

    let mut cmd = CommandBuilder::new(program);
    cmd.args(args);
    cmd.cwd(cwd);
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| ExecutionError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;
    // Only the child keeps the slave side open, so reads end when it exits.
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| ExecutionError::Pty(e.to_string()))?;

    Ok(PtyProcess {
        pid: child.process_id(),
        child,
        reader,
        master: pair.master,
    })
}

/// Send SIGTERM to the process group led by `pid`.
///
/// The PTY child is a session leader, so its pid is also its group id.
#[cfg(unix)]
pub(crate) fn terminate_group(pid: u32) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: killpg has no memory-safety preconditions.
    unsafe { libc::killpg(pgid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
pub(crate) fn terminate_group(_pid: u32) -> bool {
    false
}

/// Send SIGKILL to the process group led by `pid`.
#[cfg(unix)]
pub(crate) fn kill_group(pid: u32) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: killpg has no memory-safety preconditions.
    unsafe { libc::killpg(pgid, libc::SIGKILL) == 0 }
}

#[cfg(not(unix))]
pub(crate) fn kill_group(_pid: u32) -> bool {
    false
}

/// Identity of the user running the package manager.
pub fn invoking_user() -> String {
    for key in ["USER", "USERNAME", "LOGNAME"] {
        if let Ok(user) = std::env::var(key) {
            if !user.is_empty() {
                return user;
            }
        }
    }

    #[cfg(unix)]
    {
        // SAFETY: geteuid cannot fail.
        format!("uid {}", unsafe { libc::geteuid() })
    }

    #[cfg(not(unix))]
    {
        "unknown".to_string()
    }
}
