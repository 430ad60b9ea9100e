//! deckd Library
//!
//! Profile compilation and command execution for the deckd controller
//! daemon. Public API for testing and integration.

pub mod compiler;
pub mod config;
pub mod daemon;
pub mod events;
pub mod ini;
pub mod profile;
pub mod runner;

/// Re-export commonly used types
pub use compiler::{next_command_id, CompileError, ProfileCompiler};
pub use config::{install_profiles, Config, ConfigError, ProfileEntry, RunnerConfig};
pub use daemon::{Daemon, DaemonError, Triggered};
pub use events::{EvdevNames, EventClass, EventCode, EventResolver};
pub use ini::{Ini, IniError, Values};
pub use profile::{
    AbsAxis, Binding, BindingTable, EventBinding, Input, Profile, SubDevice, UnknownInput,
    VirtualDevice,
};
pub use runner::{Runner, RunnerError, RunnerOptions};
