//! Daemon state
//!
//! Owns the active profile snapshot and the command runner, and performs the
//! actions bound to inputs that do not involve the virtual devices: running
//! commands and switching profiles.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, info, warn};

use crate::compiler::{CompileError, ProfileCompiler};
use crate::config::Config;
use crate::profile::{Binding, EventBinding, Input, Profile, VirtualDevice};
use crate::runner::{Runner, RunnerError};

/// Outcome of [`Daemon::trigger`]
#[derive(Debug, Clone, PartialEq)]
pub enum Triggered {
    /// The input is unbound
    Nothing,
    /// The input maps to a device event, to be emitted by the caller
    Event {
        device: VirtualDevice,
        event: EventBinding,
    },
    /// A command was launched
    Spawned { pid: u32 },
    /// The named profile is now active
    SwitchedProfile(String),
}

/// The running daemon
pub struct Daemon {
    config: Config,
    compiler: ProfileCompiler,
    runner: Arc<Runner>,
    active: RwLock<Arc<Profile>>,
    active_path: RwLock<Option<PathBuf>>,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        let runner = Runner::with_options(config.runner.options());
        Self {
            config,
            compiler: ProfileCompiler::new(),
            runner: Arc::new(runner),
            active: RwLock::new(Arc::new(Profile::default())),
            active_path: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn runner(&self) -> &Arc<Runner> {
        &self.runner
    }

    /// Start the command runner
    pub fn start(&self) -> Result<(), DaemonError> {
        self.runner.start()?;
        Ok(())
    }

    /// Snapshot of the active profile
    pub fn profile(&self) -> Arc<Profile> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// File the active profile was compiled from
    pub fn active_path(&self) -> Option<PathBuf> {
        self.active_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Find, compile and activate a profile by name
    pub fn load_profile(&self, name: &str) -> Result<Arc<Profile>, DaemonError> {
        let path = self
            .config
            .find_profile(name)
            .ok_or_else(|| DaemonError::ProfileNotFound(name.to_string()))?;
        self.load_profile_file(&path)
    }

    /// Compile and activate a profile file
    ///
    /// The active profile is left untouched if compilation fails.
    pub fn load_profile_file(&self, path: &Path) -> Result<Arc<Profile>, DaemonError> {
        let profile = match self.compiler.compile(path) {
            Ok(profile) => Arc::new(profile),
            Err(e) => {
                error!(path = %path.display(), "Failed to load profile: {}", e);
                return Err(DaemonError::Compile(e));
            }
        };

        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&profile);
        *self
            .active_path
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(path.to_path_buf());

        info!(
            path = %path.display(),
            profile = %profile.name,
            bindings = profile.bindings.bound().count(),
            "Profile loaded"
        );
        Ok(profile)
    }

    /// Recompile the active profile file
    pub fn reload(&self) -> Result<Arc<Profile>, DaemonError> {
        let path = self.active_path().ok_or(DaemonError::NoActiveProfile)?;
        info!(path = %path.display(), "Reloading profile");
        self.load_profile_file(&path)
    }

    /// Perform the action bound to `input` in the active profile
    pub fn trigger(&self, input: Input) -> Result<Triggered, DaemonError> {
        let profile = self.profile();

        match profile.bindings.get(input) {
            Binding::None => Ok(Triggered::Nothing),
            Binding::Event { device, event } => Ok(Triggered::Event {
                device: *device,
                event: *event,
            }),
            Binding::Command { command, id, .. } => match self.runner.fire(command, *id) {
                Ok(pid) => Ok(Triggered::Spawned { pid }),
                Err(e) => {
                    if !matches!(e, RunnerError::AlreadyRunning(_)) {
                        warn!(%input, "Failed to run bound command: {}", e);
                    }
                    Err(DaemonError::Runner(e))
                }
            },
            Binding::Profile { name } => {
                let loaded = self.load_profile(name)?;
                Ok(Triggered::SwitchedProfile(loaded.name.clone()))
            }
        }
    }

    /// Stop the runner, waiting for running commands
    pub fn shutdown(&self) {
        info!("Shutting down");
        self.runner.stop();
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Daemon error type
#[derive(Debug)]
pub enum DaemonError {
    /// No `<name>.ini` in any profile directory
    ProfileNotFound(String),
    /// Profile failed to compile
    Compile(CompileError),
    /// Command runner error
    Runner(RunnerError),
    /// Reload requested before any profile file was loaded
    NoActiveProfile,
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::ProfileNotFound(name) => write!(f, "Profile '{}' not found", name),
            DaemonError::Compile(e) => write!(f, "{}", e),
            DaemonError::Runner(e) => write!(f, "{}", e),
            DaemonError::NoActiveProfile => write!(f, "No profile file is active"),
        }
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DaemonError::Compile(e) => Some(e),
            DaemonError::Runner(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CompileError> for DaemonError {
    fn from(e: CompileError) -> Self {
        DaemonError::Compile(e)
    }
}

impl From<RunnerError> for DaemonError {
    fn from(e: RunnerError) -> Self {
        DaemonError::Runner(e)
    }
}
