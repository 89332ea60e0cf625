//! Transient process control.
//!
//! The bootstrap protocol runs the database once without authentication. The
//! process is launched through [`ProcessLauncher`] so tests can substitute a
//! fake, and is always terminated with `SIGTERM` before the permanent service
//! is restarted. A process that outlives the exit deadline is killed and
//! reaped before the timeout is reported.

use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::PROCESS_TARGET;
use crate::error::StateDbError;

pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default deadline for a signalled process to exit.
pub const EXIT_TIMEOUT: Duration = Duration::from_secs(10);

/// A running process the caller owns.
pub trait TransientProcess: Send {
    /// Operating-system process identifier.
    fn pid(&self) -> u32;

    /// Returns the exit status once the process has exited.
    ///
    /// # Errors
    ///
    /// Returns an error when the process state cannot be queried.
    fn try_wait(&mut self) -> Result<Option<String>, StateDbError>;

    /// Asks the process to exit with `SIGTERM`.
    ///
    /// # Errors
    ///
    /// Returns an error when the signal cannot be delivered to a live process.
    fn terminate(&mut self) -> Result<(), StateDbError>;

    /// Kills the process with `SIGKILL` and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns an error when the process cannot be killed or reaped.
    fn kill(&mut self) -> Result<String, StateDbError>;
}

/// Starts processes.
pub trait ProcessLauncher: Send + Sync {
    /// Launches `program` with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`StateDbError::Launch`] when the program cannot be spawned.
    fn launch(
        &self,
        program: &Utf8Path,
        args: &[String],
    ) -> Result<Box<dyn TransientProcess>, StateDbError>;
}

/// Signals `process` and polls until it exits or `timeout` passes.
///
/// A process still running at the deadline is killed and reaped, so it never
/// outlives this call.
///
/// # Errors
///
/// Returns [`StateDbError::ExitTimeout`] when the process outlives the
/// deadline, or any error raised while signalling, killing or polling it.
pub fn terminate_and_wait(
    process: &mut dyn TransientProcess,
    timeout: Duration,
) -> Result<String, StateDbError> {
    let pid = process.pid();
    if let Some(status) = process.try_wait()? {
        debug!(target: PROCESS_TARGET, pid, %status, "process already exited");
        return Ok(status);
    }
    process.terminate()?;
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = process.try_wait()? {
            info!(target: PROCESS_TARGET, pid, %status, "transient process exited");
            return Ok(status);
        }
        if Instant::now() >= deadline {
            warn!(target: PROCESS_TARGET, pid, "transient process ignored SIGTERM; killing it");
            let status = process.kill()?;
            info!(target: PROCESS_TARGET, pid, %status, "transient process killed");
            return Err(StateDbError::ExitTimeout { pid, timeout });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Launches the database server binary as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct MongodLauncher;

impl ProcessLauncher for MongodLauncher {
    fn launch(
        &self,
        program: &Utf8Path,
        args: &[String],
    ) -> Result<Box<dyn TransientProcess>, StateDbError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| StateDbError::Launch {
                program: program.to_path_buf(),
                source: Arc::new(source),
            })?;
        info!(
            target: PROCESS_TARGET,
            pid = child.id(),
            program = %program,
            "launched transient process"
        );
        Ok(Box::new(ChildProcess { child }))
    }
}

/// A spawned child process.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

impl TransientProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> Result<Option<String>, StateDbError> {
        let pid = self.child.id();
        self.child
            .try_wait()
            .map(|status| status.map(|status| status.to_string()))
            .map_err(|source| StateDbError::Monitor {
                pid,
                source: Arc::new(source),
            })
    }

    fn terminate(&mut self) -> Result<(), StateDbError> {
        let pid = self.child.id();
        let raw = i32::try_from(pid).map_err(|_| StateDbError::Signal {
            pid,
            source: Errno::EINVAL,
        })?;
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(StateDbError::Signal { pid, source }),
        }
    }

    fn kill(&mut self) -> Result<String, StateDbError> {
        let pid = self.child.id();
        let monitor = |source| StateDbError::Monitor {
            pid,
            source: Arc::new(source),
        };
        self.child.kill().map_err(monitor)?;
        self.child
            .wait()
            .map(|status| status.to_string())
            .map_err(monitor)
    }
}
