use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ProcessError;
use crate::types::*;

/// Splits a command line into `<program> <args...>` on whitespace.
pub fn split_command_line(line: &str) -> Result<(String, Vec<String>), ProcessError> {
    let mut words = line.split_whitespace().map(str::to_string);
    let program = words.next().ok_or(ProcessError::EmptyCommand)?;
    Ok((program, words.collect()))
}

/// Sends SIGTERM to a process group.
pub fn terminate(pgid: i32) -> Result<(), ProcessError> {
    signal_group(pgid, Signal::SIGTERM)
}

/// Sends SIGKILL to a process group.
pub fn kill(pgid: i32) -> Result<(), ProcessError> {
    signal_group(pgid, Signal::SIGKILL)
}

fn signal_group(pgid: i32, signal: Signal) -> Result<(), ProcessError> {
    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!(pgid, ?signal, "process group already gone");
            Ok(())
        }
        Err(e) => Err(ProcessError::Signal(pgid, e)),
    }
}

/// The command of the chain that is currently (or was most recently) running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcess {
    pub pgid: i32,
    pub command: String,
    pub state: ProcessState,
}

#[derive(Debug, Default)]
struct SlotState {
    current: Option<ManagedProcess>,
    pass_active: bool,
    restart_requested: bool,
    shutdown_requested: bool,
}

impl SlotState {
    fn interruption(&self) -> Option<ChainOutcome> {
        if self.shutdown_requested {
            Some(ChainOutcome::Shutdown)
        } else if self.restart_requested {
            Some(ChainOutcome::Interrupted)
        } else {
            None
        }
    }

    fn terminate_current(&mut self) -> Result<Option<i32>, ProcessError> {
        match self.current.as_mut() {
            Some(process) if process.state == ProcessState::Running => {
                terminate(process.pgid)?;
                process.state = ProcessState::Terminated;
                Ok(Some(process.pgid))
            }
            _ => Ok(None),
        }
    }

    fn kill_current(&mut self) -> Result<Option<i32>, ProcessError> {
        match self.current.as_mut() {
            Some(process) if process.state != ProcessState::Exited => {
                kill(process.pgid)?;
                process.state = ProcessState::Terminated;
                Ok(Some(process.pgid))
            }
            _ => Ok(None),
        }
    }
}

enum Launch {
    Started(Child),
    Failed(ProcessError),
    Interrupted(ChainOutcome),
}

/// Shared slot between the chain (which owns and reaps the children) and the
/// monitor (which may only signal them).
///
/// Checking for a pending interruption and publishing a freshly spawned child
/// happen under the same lock as setting the interruption and signaling, so a
/// restart request can never slip in between two commands unnoticed.
#[derive(Debug, Clone, Default)]
pub struct ProcessSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl ProcessSlot {
    pub fn new() -> Self {
        ProcessSlot::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Option<ManagedProcess> {
        self.lock().current.clone()
    }

    pub fn state(&self) -> SupervisorState {
        let slot = self.lock();
        if slot.restart_requested && slot.pass_active {
            SupervisorState::Restarting
        } else if slot.pass_active {
            SupervisorState::Running
        } else {
            SupervisorState::Idle
        }
    }

    pub fn is_restart_requested(&self) -> bool {
        self.lock().restart_requested
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.lock().shutdown_requested
    }

    /// Marks a restart as pending and sends SIGTERM to the running command.
    ///
    /// Returns the signaled process group, or `None` when nothing was running
    /// or a restart was already pending.
    pub fn request_restart(&self) -> Result<Option<i32>, ProcessError> {
        let mut slot = self.lock();
        if slot.restart_requested {
            return Ok(None);
        }
        slot.restart_requested = true;
        match slot.terminate_current() {
            Ok(pgid) => Ok(pgid),
            Err(err) => {
                // nothing was stopped, so the request may be made again
                slot.restart_requested = false;
                Err(err)
            }
        }
    }

    /// Marks the supervisor as shutting down and terminates the running
    /// command. A second request kills the process group outright.
    pub fn request_shutdown(&self) -> Result<Option<i32>, ProcessError> {
        let mut slot = self.lock();
        if slot.shutdown_requested {
            return slot.kill_current();
        }
        slot.shutdown_requested = true;
        slot.terminate_current()
    }

    /// Sends SIGKILL to `pgid` if it was terminated and still has not exited.
    pub fn escalate(&self, pgid: i32) -> Result<bool, ProcessError> {
        let slot = self.lock();
        match &slot.current {
            Some(process) if process.pgid == pgid && process.state == ProcessState::Terminated => {
                kill(pgid)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) fn begin_pass(&self) {
        let mut slot = self.lock();
        slot.current = None;
        slot.restart_requested = false;
        slot.pass_active = true;
    }

    pub(crate) fn end_pass(&self) {
        self.lock().pass_active = false;
    }

    fn interruption(&self) -> Option<ChainOutcome> {
        self.lock().interruption()
    }

    fn launch<F>(&self, command: &str, spawn: F) -> Launch
    where
        F: FnOnce() -> Result<Child, ProcessError>,
    {
        let mut slot = self.lock();
        if let Some(outcome) = slot.interruption() {
            return Launch::Interrupted(outcome);
        }

        match spawn() {
            Ok(child) => {
                slot.current = Some(ManagedProcess {
                    // spawned with process_group(0), so the group id is the pid
                    pgid: child.id() as i32,
                    command: command.to_string(),
                    state: ProcessState::Running,
                });
                Launch::Started(child)
            }
            Err(err) => Launch::Failed(err),
        }
    }

    fn mark_exited(&self, pgid: i32) {
        let mut slot = self.lock();
        if let Some(process) = slot.current.as_mut() {
            if process.pgid == pgid {
                process.state = ProcessState::Exited;
            }
        }
    }
}

/// Runs the configured commands one after another in the working copy.
pub struct ProcessChain {
    commands: Vec<String>,
    working_directory: PathBuf,
    stdin_line: String,
    start_failure: StartFailurePolicy,
    slot: ProcessSlot,
}

impl ProcessChain {
    pub fn new(
        commands: Vec<String>,
        working_directory: impl Into<PathBuf>,
        slot: ProcessSlot,
    ) -> Self {
        ProcessChain {
            commands,
            working_directory: working_directory.into(),
            stdin_line: "4".to_string(),
            start_failure: StartFailurePolicy::Skip,
            slot,
        }
    }

    pub fn from_config(config: &Config, slot: ProcessSlot) -> Self {
        ProcessChain::new(config.cmd.clone(), config.directory.clone(), slot)
            .with_stdin_line(config.stdin_line.clone())
            .with_start_failure_policy(config.on_start_failure)
    }

    pub fn with_stdin_line(mut self, line: impl Into<String>) -> Self {
        self.stdin_line = line.into();
        self
    }

    pub fn with_start_failure_policy(mut self, policy: StartFailurePolicy) -> Self {
        self.start_failure = policy;
        self
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn slot(&self) -> &ProcessSlot {
        &self.slot
    }

    /// Runs every command in order, waiting for each to exit.
    ///
    /// Returns early when a restart or shutdown is requested through the slot.
    pub fn run_sequence(&self) -> ChainOutcome {
        for (index, line) in self.commands.iter().enumerate() {
            let mut child = match self.slot.launch(line, || self.spawn(line)) {
                Launch::Started(child) => child,
                Launch::Interrupted(outcome) => {
                    debug!(index, command = %line, "not starting command, chain interrupted");
                    return outcome;
                }
                Launch::Failed(err) => {
                    error!(index, command = %line, error = %err, "failed to start command");
                    match self.start_failure {
                        StartFailurePolicy::Skip => continue,
                        StartFailurePolicy::Abort => return ChainOutcome::Aborted(err.to_string()),
                    }
                }
            };

            let pgid = child.id() as i32;
            info!(index, pgid, command = %line, "started command");
            self.feed_stdin(&mut child, line);

            match child.wait() {
                Ok(status) if status.success() => {
                    info!(index, pgid, command = %line, "command finished")
                }
                Ok(status) => {
                    warn!(index, pgid, command = %line, %status, "command exited unsuccessfully")
                }
                Err(e) => error!(
                    index,
                    pgid,
                    error = %ProcessError::Wait(line.clone(), e),
                    "lost track of command"
                ),
            }
            self.slot.mark_exited(pgid);

            if let Some(outcome) = self.slot.interruption() {
                debug!(index, command = %line, ?outcome, "abandoning remaining commands");
                return outcome;
            }
        }

        ChainOutcome::Completed
    }

    fn spawn(&self, line: &str) -> Result<Child, ProcessError> {
        let (program, args) = split_command_line(line)?;

        Command::new(&program)
            .args(&args)
            .current_dir(&self.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0)
            .spawn()
            .map_err(|e| ProcessError::Start(line.to_string(), e))
    }

    /// Writes the input line and closes stdin. Runs outside the slot lock:
    /// a child that never reads may block the write until it is signaled.
    fn feed_stdin(&self, child: &mut Child, line: &str) {
        // dropping the handle closes the child's stdin
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = writeln!(stdin, "{}", self.stdin_line) {
                debug!(command = %line, error = %e, "command did not take its input line");
            }
        }
    }
}
