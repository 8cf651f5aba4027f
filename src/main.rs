use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use controlmapper::config::{EngineConfig, OutputBackend};
use controlmapper::controller::{DeviceBackend, GilrsBackend};
use controlmapper::engine::{BackendFactory, EngineEventKind, EngineHandle, EngineStatus};
use controlmapper::output::{RecordingProvider, VirtualDeviceProvider};
use controlmapper::persistence::{load_profile, ProfileStore};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "controlmapper",
    version,
    about = "Remaps game controllers onto virtual input devices"
)]
struct Args {
    /// Profile document to activate, or the name of a stored profile
    #[arg(value_name = "PROFILE")]
    profile: PathBuf,

    /// Engine settings file (default: <config dir>/controlmapper/engine.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the output backend (uinput, input_plumber, recording)
    #[arg(long, value_name = "BACKEND")]
    backend: Option<OutputBackend>,

    /// Record output in memory instead of creating virtual devices
    #[arg(long)]
    dry_run: bool,

    /// Validate the profile and exit
    #[arg(long)]
    check: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup(args.verbose)?;
    let profile_path = resolve_profile(&args.profile).await?;

    if args.check {
        let profile = load_profile(&profile_path).await?;
        profile.validate()?;
        info!(
            "Profile '{}' (revision {}) is valid: {} modes",
            profile.name,
            profile.revision,
            profile.modes.len()
        );
        return Ok(());
    }

    let config_path = match args.config {
        Some(path) => path,
        None => EngineConfig::default_path()?,
    };
    let mut config = EngineConfig::load_or_default(&config_path).await?;
    if let Some(backend) = args.backend {
        config.output_backend = backend;
    }
    if args.dry_run {
        config.output_backend = OutputBackend::Recording;
    }
    info!(
        "Using {} output, ticking every {:?}",
        config.output_backend,
        config.tick_interval()
    );

    let provider = output_provider(&config)?;
    let backend: BackendFactory = Box::new(|| {
        GilrsBackend::create().map(|backend| Box::new(backend) as Box<dyn DeviceBackend>)
    });

    let mut engine = EngineHandle::new(config)?;
    let mut events = engine.subscribe();
    engine
        .start(&profile_path, backend, provider)
        .await
        .map_err(|e| eyre!("Failed to start engine: {}", e))?;

    for device in engine.devices() {
        info!("Input device: {} ({:?})", device, device.capabilities);
    }

    let mut status = engine.watch_status();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => match &event.kind {
                    EngineEventKind::EngineError(message) => error!("{}", message),
                    EngineEventKind::DeviceConnected(_)
                    | EngineEventKind::DeviceDisconnected(_)
                    | EngineEventKind::ProfileActivated { .. } => info!("{}", event),
                    _ => debug!("{}", event),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} engine events", skipped),
                Err(RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() || *status.borrow_and_update() == EngineStatus::Stopped {
                    error!("Engine stopped on its own");
                    break;
                }
            }
        }
    }

    engine.stop().await?;
    Ok(())
}

/// Falls back to the profile store when `profile` is a bare name that is not a file
async fn resolve_profile(profile: &Path) -> Result<PathBuf> {
    let bare_name = profile.components().count() == 1 && profile.extension().is_none();
    if !bare_name || tokio::fs::try_exists(profile).await? {
        return Ok(profile.to_path_buf());
    }
    let store = ProfileStore::default_location()?;
    let path = store.path_for(&profile.to_string_lossy());
    debug!("Resolved profile '{}' to {}", profile.display(), path.display());
    Ok(path)
}

fn output_provider(config: &EngineConfig) -> Result<Box<dyn VirtualDeviceProvider>> {
    match config.output_backend {
        OutputBackend::Recording => Ok(Box::new(RecordingProvider::new())),
        #[cfg(target_os = "linux")]
        OutputBackend::Uinput => Ok(Box::new(controlmapper::output::UinputProvider::new(
            config.virtual_device_name.clone(),
        ))),
        #[cfg(target_os = "linux")]
        OutputBackend::InputPlumber => {
            Ok(Box::new(controlmapper::output::InputPlumberProvider::new()))
        }
        #[cfg(not(target_os = "linux"))]
        other => Err(eyre!("{} output is only available on Linux", other)),
    }
}

fn setup(verbose: bool) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env(if verbose { Level::DEBUG } else { Level::INFO });
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
