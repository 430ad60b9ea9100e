//! deckd
//!
//! Controller profile daemon: compiles the active profile, runs bound
//! commands and switches profiles, recompiling when the profile file changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use deckd::{Config, Daemon, Input, Profile, ProfileCompiler, Triggered, VirtualDevice};

/// Quiet period after a profile change before reloading (editors write in bursts)
const RELOAD_DEBOUNCE_MS: u64 = 200;

/// deckd - Controller profile daemon
#[derive(Parser, Debug)]
#[command(name = "deckd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/deckd/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Profile to load at startup, overriding the configuration
    #[arg(short, long)]
    profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Compile a profile file, print a summary and exit
    #[arg(long, value_name = "FILE")]
    check: Option<PathBuf>,

    /// Perform the action bound to an input in the startup profile and exit
    #[arg(long, value_name = "INPUT")]
    trigger: Option<String>,

    /// List all bindable input names and exit
    #[arg(long)]
    list_inputs: bool,

    /// List the profiles found in the profile directories and exit
    #[arg(long)]
    list_profiles: bool,

    /// Write the default configuration and shipped profiles if missing and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.list_inputs {
        for input in Input::ALL {
            println!("{}", input);
        }
        return Ok(());
    }

    if let Some(path) = &args.check {
        let profile = ProfileCompiler::new().compile(path)?;
        print_profile_summary(&profile);
        return Ok(());
    }

    if args.init_config {
        let config = Config::create_default_if_missing()?;
        if let Some(path) = &config.config_path {
            println!("{}", path.display());
        }
        for path in Config::install_user_profiles()? {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }
    };

    if args.list_profiles {
        for entry in config.list_profiles() {
            println!("{:<20} {}", entry.name, entry.path.display());
        }
        return Ok(());
    }

    let profile_name = args.profile.clone().unwrap_or_else(|| config.profile.clone());
    let daemon = Arc::new(Daemon::new(config));

    if let Some(name) = &args.trigger {
        let input: Input = name.parse()?;
        daemon.load_profile(&profile_name)?;
        daemon.start()?;
        let result = daemon.trigger(input);
        daemon.shutdown();
        report_trigger(input, result?);
        return Ok(());
    }

    info!("deckd starting...");

    // Keep running on the built-in template if the startup profile is unusable
    if let Err(e) = daemon.load_profile(&profile_name) {
        error!(profile = %profile_name, "Failed to load startup profile: {}", e);
        warn!("Using built-in default profile");
    }

    daemon.start()?;

    let (reload_tx, mut reload_rx) = mpsc::channel::<Vec<PathBuf>>(16);
    let _watcher = if daemon.config().hot_reload {
        match watch_profiles(&daemon.config().profile_search_path(), reload_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Profile hot-reload unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut sigterm = signal(SignalKind::terminate())?;

    info!("deckd ready");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting...");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, exiting...");
                break;
            }
            Some(changed) = reload_rx.recv() => {
                let Some(active) = daemon.active_path() else {
                    continue;
                };
                if changed.iter().any(|path| same_file(path, &active)) {
                    if let Err(e) = daemon.reload() {
                        warn!("Keeping previous profile: {}", e);
                    }
                }
            }
        }
    }

    // Waits for running commands, keep it off the async workers
    let shutdown = Arc::clone(&daemon);
    tokio::task::spawn_blocking(move || shutdown.shutdown()).await?;

    Ok(())
}

/// Watch the profile directories, forwarding each debounced batch of changed paths
fn watch_profiles(
    dirs: &[PathBuf],
    tx: mpsc::Sender<Vec<PathBuf>>,
) -> notify::Result<Debouncer<notify::RecommendedWatcher>> {
    let debounce = Duration::from_millis(RELOAD_DEBOUNCE_MS);
    let mut debouncer = new_debouncer(debounce, move |res: DebounceEventResult| match res {
        Ok(events) => {
            let changed = dedup_paths(
                events
                    .into_iter()
                    .filter(|e| !matches!(e.kind, DebouncedEventKind::AnyContinuous))
                    .map(|e| e.path),
            );
            if !changed.is_empty() {
                // Receiver gone means we are shutting down
                let _ = tx.blocking_send(changed);
            }
        }
        Err(e) => warn!("Profile watch error: {:?}", e),
    })?;

    for dir in dirs.iter().filter(|d| d.is_dir()) {
        match debouncer.watcher().watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => debug!(dir = %dir.display(), "Watching profile directory"),
            Err(e) => warn!(dir = %dir.display(), "Cannot watch profile directory: {}", e),
        }
    }

    Ok(debouncer)
}

/// Paths in first-seen order, without repeats
fn dedup_paths(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut changed: Vec<PathBuf> = Vec::new();
    for path in paths {
        if !changed.contains(&path) {
            changed.push(path);
        }
    }
    changed
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn report_trigger(input: Input, result: Triggered) {
    match result {
        Triggered::Nothing => println!("{}: unbound", input),
        Triggered::Event { device, event } => println!("{}: {} {}", input, device, event),
        Triggered::Spawned { pid } => println!("{}: launched pid {}", input, pid),
        Triggered::SwitchedProfile(name) => println!("{}: switched to profile '{}'", input, name),
    }
}

/// Print a compiled profile for `--check`
fn print_profile_summary(profile: &Profile) {
    println!("Profile:     {}", profile.name);
    println!("Description: {}", profile.description);
    println!();

    let f = &profile.features;
    println!("Features:");
    println!("  force feedback:     {}", f.force_feedback);
    println!("  motion device:      {}", f.motion_device);
    println!("  mouse device:       {}", f.mouse_device);
    println!("  lizard mode:        {}", f.lizard_mode);
    println!("  stick filtering:    {}", f.stick_filtering);
    println!("  trackpad filtering: {}", f.trackpad_filtering);
    println!();

    println!("Devices:");
    for device in VirtualDevice::ALL {
        let sub = profile.devices.get(device);
        println!(
            "  {:<8} \"{}\" 0x{:04X}:0x{:04X} v{}",
            device.keyword(),
            sub.name,
            sub.vendor_id,
            sub.product_id,
            sub.version_string()
        );
        println!(
            "           {} keys, {} relative axes, {} absolute axes",
            sub.keys.len(),
            sub.rel_axes.len(),
            sub.abs_axes.len()
        );
    }
    println!();

    let bound: Vec<_> = profile.bindings.bound().collect();
    println!("Bindings ({} of {}):", bound.len(), Input::COUNT);
    for (input, binding) in bound {
        println!("  {:<20} {}", input, binding);
    }
}
