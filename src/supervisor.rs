use std::io;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::{error, info, warn};

use crate::process::{ProcessChain, ProcessSlot};
use crate::sync::SyncEngine;
use crate::types::*;

/// Ties synchronization outcomes to the lifecycle of the command chain.
///
/// Each pass runs the chain on the calling thread while a monitor thread
/// polls the remote. A detected change terminates the running command and
/// starts a new pass from the first command; a pass that completes without
/// a change ends the supervisor.
pub struct Supervisor {
    engine: SyncEngine,
    chain: ProcessChain,
    poll_interval: Duration,
    kill_after: Option<Duration>,
    passes: u64,
}

impl Supervisor {
    pub fn new(engine: SyncEngine, chain: ProcessChain, poll_interval: Duration) -> Self {
        Supervisor {
            engine,
            chain,
            poll_interval,
            kill_after: None,
            passes: 0,
        }
    }

    /// Escalate to SIGKILL when a terminated command outlives `kill_after`.
    pub fn with_kill_after(mut self, kill_after: Option<Duration>) -> Self {
        self.kill_after = kill_after;
        self
    }

    pub fn slot(&self) -> &ProcessSlot {
        self.chain.slot()
    }

    pub fn state(&self) -> SupervisorState {
        self.chain.slot().state()
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn run(&mut self) -> ChainOutcome {
        loop {
            self.passes += 1;
            info!(
                pass = self.passes,
                commands = self.chain.commands().len(),
                "starting command chain"
            );

            match self.run_pass() {
                ChainOutcome::Interrupted => {
                    info!(pass = self.passes, "repository changed, restarting command chain");
                }
                ChainOutcome::Completed => {
                    info!(pass = self.passes, "command chain completed without changes");
                    return ChainOutcome::Completed;
                }
                ChainOutcome::Shutdown => {
                    info!(pass = self.passes, "supervisor shutting down");
                    return ChainOutcome::Shutdown;
                }
                ChainOutcome::Aborted(reason) => {
                    error!(pass = self.passes, %reason, "command chain aborted");
                    return ChainOutcome::Aborted(reason);
                }
            }
        }
    }

    fn run_pass(&mut self) -> ChainOutcome {
        let slot = self.chain.slot().clone();
        slot.begin_pass();

        let (cancel_tx, cancel_rx) = channel::bounded::<()>(0);
        let engine = &mut self.engine;
        let chain = &self.chain;
        let poll_interval = self.poll_interval;
        let kill_after = self.kill_after;

        let outcome = thread::scope(|scope| {
            let monitor_slot = slot.clone();
            let monitor = thread::Builder::new()
                .name("autopull-monitor".to_string())
                .spawn_scoped(scope, move || {
                    monitor(engine, &monitor_slot, poll_interval, kill_after, cancel_rx)
                });

            let monitor = match monitor {
                Ok(handle) => Some(handle),
                Err(err) => {
                    // keep the chain running, just without polling
                    error!(error = %err, "failed to start the monitor thread");
                    None
                }
            };

            let outcome = chain.run_sequence();

            drop(cancel_tx);
            if let Some(handle) = monitor {
                if handle.join().is_err() {
                    error!("monitor thread panicked");
                }
            }

            outcome
        });

        // a change noticed while the last command was finishing still counts
        let outcome = match outcome {
            ChainOutcome::Completed if slot.is_restart_requested() => ChainOutcome::Interrupted,
            other => other,
        };

        slot.end_pass();
        outcome
    }
}

/// Polls every `poll_interval` until the pass ends or a change is found.
///
/// Returns after requesting a restart: the next pass starts a fresh monitor,
/// so the cadence resumes only once the chain has been restarted.
fn monitor(
    engine: &mut SyncEngine,
    slot: &ProcessSlot,
    poll_interval: Duration,
    kill_after: Option<Duration>,
    cancel: Receiver<()>,
) {
    // a change whose restart could not be signaled yet
    let mut pending: Option<MergeOutcome> = None;

    loop {
        match cancel.recv_timeout(poll_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }

        if slot.is_shutdown_requested() {
            return;
        }

        let outcome = match pending.take() {
            Some(outcome) => outcome,
            None => match engine.tick() {
                TickOutcome::Changed(outcome) => outcome,
                // failures are already logged by the engine; try again next tick
                TickOutcome::Unchanged(_) | TickOutcome::Failed(_) => continue,
            },
        };

        let pgid = match slot.request_restart() {
            Ok(Some(pgid)) => {
                info!(pgid, ?outcome, "sent SIGTERM to the running command");
                pgid
            }
            Ok(None) => {
                info!(?outcome, "no command running, restart pending");
                return;
            }
            Err(err) => {
                error!(error = %err, "failed to terminate the running command, retrying next tick");
                pending = Some(outcome);
                continue;
            }
        };

        if let Some(grace) = kill_after {
            escalate_after(slot, pgid, grace, &cancel);
        }
        return;
    }
}

fn escalate_after(slot: &ProcessSlot, pgid: i32, grace: Duration, cancel: &Receiver<()>) {
    if let Err(RecvTimeoutError::Timeout) = cancel.recv_timeout(grace) {
        match slot.escalate(pgid) {
            Ok(true) => warn!(pgid, ?grace, "command ignored SIGTERM, sent SIGKILL"),
            Ok(false) => {}
            Err(err) => error!(error = %err, "failed to kill the running command"),
        }
    }
}

/// Forwards SIGINT/SIGTERM sent to the supervisor to the running command.
///
/// Close the returned handle once the supervisor has returned.
pub fn listen_for_shutdown(slot: ProcessSlot) -> io::Result<Handle> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let handle = signals.handle();

    thread::Builder::new()
        .name("autopull-signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                info!(signal, "shutdown requested");
                match slot.request_shutdown() {
                    Ok(Some(pgid)) => info!(pgid, "signaled the running command"),
                    Ok(None) => {}
                    Err(err) => error!(error = %err, "failed to signal the running command"),
                }
            }
        })?;

    Ok(handle)
}
