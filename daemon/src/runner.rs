//! Command runner
//!
//! Launches the shell commands attached to `Command` bindings. Every command
//! runs as `<shell> -c <command>` in its own child process and the caller
//! never waits on it.
//!
//! Commands fired with a non-zero binding id are deduplicated: while a child
//! launched for that id is still alive, firing the same id again is refused
//! with [`RunnerError::AlreadyRunning`]. A background reaper thread collects
//! exited children every poll interval, which is what frees the id again.
//!
//! [`Runner::stop`] joins the reaper and then waits for every tracked child,
//! so no process launched through the runner outlives the daemon unnoticed.

use std::fmt;
use std::io;
use std::mem;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

/// Default interval between reaper sweeps
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default shell used to interpret commands
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Runner tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOptions {
    /// How often exited children are collected
    pub poll_interval: Duration,
    /// How long `stop` waits for a child before sending SIGTERM.
    /// `None` waits for as long as it takes.
    pub shutdown_grace: Option<Duration>,
    /// Shell binary, invoked as `<shell> -c <command>`
    pub shell: PathBuf,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_grace: None,
            shell: PathBuf::from(DEFAULT_SHELL),
        }
    }
}

/// A launched child and the binding it was launched for
#[derive(Debug)]
struct ProcessRecord {
    binding_id: u32,
    /// `None` while the spawn for a deduplicated id is still in flight
    child: Option<Child>,
}

type ProcessList = Arc<Mutex<Vec<ProcessRecord>>>;

#[derive(Debug)]
struct Reaper {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// Fire-and-forget command executor with per-binding deduplication
#[derive(Debug)]
pub struct Runner {
    options: RunnerOptions,
    procs: ProcessList,
    /// `Some` while running. Fires hold the read side, start/stop the write side.
    lifecycle: RwLock<Option<Reaper>>,
}

impl Runner {
    pub fn new() -> Self {
        Self::with_options(RunnerOptions::default())
    }

    pub fn with_options(options: RunnerOptions) -> Self {
        Self {
            options,
            procs: Arc::new(Mutex::new(Vec::new())),
            lifecycle: RwLock::new(None),
        }
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Start the reaper thread
    ///
    /// Starting a runner that is already running does nothing.
    pub fn start(&self) -> Result<(), RunnerError> {
        let mut lifecycle = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);

        if lifecycle.is_some() {
            warn!("Command runner already started");
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name("deckd-reaper".to_string())
            .spawn({
                let procs = Arc::clone(&self.procs);
                let stop = Arc::clone(&stop);
                let interval = self.options.poll_interval;
                move || reap_loop(procs, stop, interval)
            })
            .map_err(RunnerError::Thread)?;

        *lifecycle = Some(Reaper { handle, stop });
        info!(
            poll_ms = self.options.poll_interval.as_millis() as u64,
            shell = %self.options.shell.display(),
            "Command runner started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Launch `command` through the shell without waiting for it
    ///
    /// With `id == 0` the command is always launched. Any other id is
    /// refused while an earlier launch with the same id is still alive.
    /// Returns the child's PID.
    pub fn fire(&self, command: &str, id: u32) -> Result<u32, RunnerError> {
        // Held for the whole call so `stop` cannot interleave with a launch
        let lifecycle = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
        if lifecycle.is_none() {
            return Err(RunnerError::NotInitialized);
        }

        if command.trim().is_empty() {
            return Err(RunnerError::EmptyCommand);
        }

        if id != 0 {
            // Check and reserve in one critical section
            let mut procs = self.lock_procs();
            if procs.iter().any(|p| p.binding_id == id) {
                debug!(id, "Command still running. Ignoring.");
                return Err(RunnerError::AlreadyRunning(id));
            }
            procs.push(ProcessRecord {
                binding_id: id,
                child: None,
            });
        }

        let spawned = self.spawn(command);

        let mut procs = self.lock_procs();
        match spawned {
            Ok(child) => {
                let pid = child.id();
                if id == 0 {
                    procs.push(ProcessRecord {
                        binding_id: 0,
                        child: Some(child),
                    });
                } else if let Some(slot) = procs
                    .iter_mut()
                    .find(|p| p.binding_id == id && p.child.is_none())
                {
                    slot.child = Some(child);
                }
                debug!(id, pid, command, "Command launched");
                Ok(pid)
            }
            Err(e) => {
                if id != 0 {
                    procs.retain(|p| !(p.binding_id == id && p.child.is_none()));
                }
                error!(id, command, "Failed to launch command: {}", e);
                Err(RunnerError::SpawnFailed(e))
            }
        }
    }

    fn spawn(&self, command: &str) -> io::Result<Child> {
        Command::new(&self.options.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .spawn()
    }

    /// Stop the reaper and wait for every tracked child to exit
    ///
    /// Blocks until launches already in progress have finished. Stopping a
    /// runner that is not running does nothing.
    pub fn stop(&self) {
        let reaper = self
            .lifecycle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(reaper) = reaper else {
            return;
        };

        debug!("Stopping command runner");
        reaper.stop.store(true, Ordering::SeqCst);
        reaper.handle.thread().unpark();
        if reaper.handle.join().is_err() {
            error!("Reaper thread panicked");
        }

        let remaining = mem::take(&mut *self.lock_procs());
        if !remaining.is_empty() {
            info!(count = remaining.len(), "Waiting for running commands to exit");
        }

        for record in remaining {
            if let Some(child) = record.child {
                self.wait_child(record.binding_id, child);
            }
        }

        info!("Command runner stopped");
    }

    fn wait_child(&self, id: u32, mut child: Child) {
        let pid = child.id();

        if let Some(grace) = self.options.shutdown_grace {
            let deadline = Instant::now() + grace;
            let step = self.options.poll_interval.min(grace).max(Duration::from_millis(1));
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => return,
                    Ok(None) if Instant::now() < deadline => thread::sleep(step),
                    Ok(None) => {
                        warn!(id, pid, "Command did not exit in time. Sending SIGTERM.");
                        terminate(pid);
                        break;
                    }
                    Err(e) => {
                        warn!(id, pid, "Failed to query command status: {}", e);
                        break;
                    }
                }
            }
        }

        match child.wait() {
            Ok(status) => debug!(id, pid, %status, "Command exited"),
            Err(e) => warn!(id, pid, "Failed to wait for command: {}", e),
        }
    }

    /// Number of children currently tracked
    pub fn tracked(&self) -> usize {
        self.lock_procs().len()
    }

    /// Whether a launch for binding `id` is still being tracked
    pub fn is_tracking(&self, id: u32) -> bool {
        self.lock_procs().iter().any(|p| p.binding_id == id)
    }

    /// PIDs of every tracked child
    pub fn tracked_pids(&self) -> Vec<u32> {
        self.lock_procs()
            .iter()
            .filter_map(|p| p.child.as_ref().map(Child::id))
            .collect()
    }

    fn lock_procs(&self) -> MutexGuard<'_, Vec<ProcessRecord>> {
        self.procs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reap_loop(procs: ProcessList, stop: Arc<AtomicBool>, interval: Duration) {
    debug!("Reaper thread running");

    while !stop.load(Ordering::SeqCst) {
        thread::park_timeout(interval);
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let mut procs = procs.lock().unwrap_or_else(PoisonError::into_inner);
        procs.retain_mut(|record| {
            // Reserved slot whose spawn has not returned yet
            let Some(child) = record.child.as_mut() else {
                return true;
            };
            match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    debug!(id = record.binding_id, pid = child.id(), %status, "Command exited");
                    false
                }
                Err(e) => {
                    warn!(
                        id = record.binding_id,
                        pid = child.id(),
                        "Failed to query command status, no longer tracking: {}",
                        e
                    );
                    false
                }
            }
        });
    }

    debug!("Reaper thread exiting");
}

fn terminate(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: plain signal delivery to a child we spawned and have not reaped
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        warn!(pid, "kill(SIGTERM) failed: {}", io::Error::last_os_error());
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Command runner error type
#[derive(Debug)]
pub enum RunnerError {
    /// The runner has not been started, or has been stopped
    NotInitialized,
    /// The command text is empty
    EmptyCommand,
    /// A launch for this binding id is still running
    AlreadyRunning(u32),
    /// The shell process could not be created
    SpawnFailed(io::Error),
    /// The reaper thread could not be created
    Thread(io::Error),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::NotInitialized => write!(f, "Command runner is not running"),
            RunnerError::EmptyCommand => write!(f, "Command is empty"),
            RunnerError::AlreadyRunning(id) => {
                write!(f, "Command for binding {} is already running", id)
            }
            RunnerError::SpawnFailed(e) => write!(f, "Failed to launch command: {}", e),
            RunnerError::Thread(e) => write!(f, "Failed to start reaper thread: {}", e),
        }
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunnerError::SpawnFailed(e) | RunnerError::Thread(e) => Some(e),
            _ => None,
        }
    }
}
