//! Async control surface for the engine thread
//!
//! [`EngineHandle`] spawns the scheduler on a dedicated OS thread and talks
//! to it over channels:
//!
//! ```text
//!  EngineHandle ──► mpsc<Command> ─────────────► engine thread
//!        ▲              (oneshot reply)              │
//!        ├── broadcast<EngineEvent> ◄────────────────┤
//!        └── watch<status/profile/devices/modes> ◄───┘
//! ```
//!
//! The device backend is built on the engine thread from a factory, because
//! HID contexts are often not `Send`.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::EngineError;
use super::events::{EngineEvent, EngineEventKind, EngineStatus, Publisher};
use super::scheduler::{Command, Scheduler};
use crate::config::EngineConfig;
use crate::controller::{Device, DeviceBackend, DeviceError, HotplugSender};
use crate::mapping::Profile;
use crate::output::VirtualDeviceProvider;
use crate::persistence::load_profile;

const ENGINE_THREAD_NAME: &str = "controlmapper-engine";

/// Builds the device backend on the engine thread
pub type BackendFactory =
    Box<dyn FnOnce() -> Result<Box<dyn DeviceBackend>, DeviceError> + Send + 'static>;

/// Handle for starting, steering and stopping one engine
///
/// Several handles can exist side by side; each owns its own thread,
/// devices and channels.
pub struct EngineHandle {
    config: EngineConfig,
    publisher: Publisher,
    commands: Option<mpsc::Sender<Command>>,
    hotplug: Option<HotplugSender>,
    cancel: Option<CancellationToken>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let publisher = Publisher::new(config.event_capacity);
        Ok(Self {
            config,
            publisher,
            commands: None,
            hotplug: None,
            cancel: None,
            thread: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Loads the profile at `profile_path` and starts the engine with it
    pub async fn start(
        &mut self,
        profile_path: &Path,
        backend: BackendFactory,
        provider: Box<dyn VirtualDeviceProvider>,
    ) -> Result<(), EngineError> {
        let profile = load_profile(profile_path).await?;
        self.start_with_profile(profile, backend, provider).await
    }

    /// Starts the engine thread and waits until it is running
    ///
    /// # Errors
    ///
    /// * [`EngineError::AlreadyRunning`] if this handle's engine is still up
    /// * [`EngineError::Profile`] if `profile` does not validate
    /// * [`EngineError::StartFailed`] if no virtual device could be acquired
    pub async fn start_with_profile(
        &mut self,
        profile: Profile,
        backend: BackendFactory,
        provider: Box<dyn VirtualDeviceProvider>,
    ) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        self.reap().await?;
        profile.validate()?;

        let (command_tx, command_rx) = mpsc::channel(self.config.command_capacity);
        let (started_tx, started_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let engine = EngineThread {
            config: self.config.clone(),
            profile: Arc::new(profile),
            backend,
            provider,
            publisher: self.publisher.clone(),
            commands: command_rx,
            cancel: cancel.clone(),
        };
        let thread = std::thread::Builder::new()
            .name(ENGINE_THREAD_NAME.to_string())
            .spawn(move || engine.run(started_tx))
            .map_err(|e| EngineError::Thread(format!("Failed to spawn engine thread: {}", e)))?;

        self.thread = Some(thread);
        match started_rx.await {
            Ok(Ok(hotplug)) => {
                self.commands = Some(command_tx);
                self.hotplug = Some(hotplug);
                self.cancel = Some(cancel);
                info!("Engine started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.reap().await?;
                Err(e)
            }
            Err(_) => {
                self.reap().await?;
                Err(EngineError::Thread(
                    "Engine thread exited during start".into(),
                ))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
            && self.commands.is_some()
    }

    /// Loads and activates the profile at `path`
    pub async fn switch_profile(&self, path: &Path) -> Result<(), EngineError> {
        let profile = load_profile(path).await?;
        self.switch_to(profile).await
    }

    /// Activates `profile` between two ticks
    ///
    /// The previous profile stays active if this fails.
    pub async fn switch_to(&self, profile: Profile) -> Result<(), EngineError> {
        profile.validate()?;
        self.request(|reply| Command::SwitchProfile { profile, reply })
            .await?
    }

    pub async fn push_mode(&self, mode: &str) -> Result<(), EngineError> {
        let mode = mode.to_string();
        self.request(|reply| Command::PushMode { mode, reply })
            .await?
    }

    /// Sender for hot-plug notifications from outside the input backend
    ///
    /// Events are picked up at the start of the next tick. `None` while the
    /// engine is not running.
    pub fn hotplug_sender(&self) -> Option<HotplugSender> {
        self.hotplug.clone()
    }

    /// Pops the topmost pushed mode; `None` if only the default mode is active
    pub async fn pop_mode(&self) -> Result<Option<String>, EngineError> {
        self.request(|reply| Command::PopMode { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let commands = self.commands.as_ref().ok_or(EngineError::NotRunning)?;
        let (reply, response) = oneshot::channel();
        commands
            .send(build(reply))
            .await
            .map_err(|_| EngineError::NotRunning)?;
        response.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Stops the engine and waits until its output is released
    ///
    /// Stopping an engine that is not running is a no-op.
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        if let Some(cancel) = self.cancel.take() {
            debug!("Sending shutdown signal to engine");
            cancel.cancel();
        }
        self.commands = None;
        self.hotplug = None;
        self.reap().await
    }

    /// Joins a finished or cancelled engine thread
    async fn reap(&mut self) -> Result<(), EngineError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let joined = tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|e| EngineError::Thread(format!("Join task failed: {}", e)))?;
        match joined {
            Ok(()) => {
                debug!("Engine thread joined");
                Ok(())
            }
            Err(_) => {
                error!("Engine thread panicked");
                self.publisher.set_status(EngineStatus::Stopped);
                Err(EngineError::Thread("Engine thread panicked".into()))
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.publisher.subscribe()
    }

    pub fn status(&self) -> EngineStatus {
        self.publisher.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.publisher.watch_status()
    }

    pub fn active_profile(&self) -> Option<Arc<Profile>> {
        self.publisher.profile()
    }

    pub fn watch_profile(&self) -> watch::Receiver<Option<Arc<Profile>>> {
        self.publisher.watch_profile()
    }

    /// Connected devices with their capabilities
    pub fn devices(&self) -> Vec<Device> {
        self.publisher.devices()
    }

    pub fn mode_stack(&self) -> Vec<String> {
        self.publisher.mode_stack()
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        // the thread releases output on its own once it sees the cancellation
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

struct EngineThread {
    config: EngineConfig,
    profile: Arc<Profile>,
    backend: BackendFactory,
    provider: Box<dyn VirtualDeviceProvider>,
    publisher: Publisher,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
}

impl EngineThread {
    fn run(mut self, started: oneshot::Sender<Result<HotplugSender, EngineError>>) {
        let backend = match (self.backend)() {
            Ok(backend) => backend,
            Err(e) => {
                error!("Failed to create input backend: {}", e);
                let _ = started.send(Err(EngineError::Device(e)));
                return;
            }
        };

        let scheduler = Scheduler::create(
            self.config.clone(),
            backend,
            self.provider,
            self.profile,
            self.publisher.clone(),
        )
        .begin();
        let mut scheduler = match scheduler.acquire(Instant::now()) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                let _ = started.send(Err(e));
                return;
            }
        };
        if started.send(Ok(scheduler.hotplug_sender())).is_err() {
            warn!("Engine start was abandoned by the caller");
            scheduler.stop().finish();
            return;
        }

        #[cfg(target_os = "linux")]
        let _inhibitor = if self.config.inhibit_screensaver {
            match crate::output::ScreenSaverInhibitor::inhibit(
                "controlmapper",
                "Controller input is being remapped",
            ) {
                Ok(inhibitor) => Some(inhibitor),
                Err(e) => {
                    warn!("Could not inhibit the screensaver: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let interval = self.config.tick_interval();
        let mut next_tick = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                debug!("Engine cancellation observed");
                break;
            }

            let commands = &mut self.commands;
            let cancel = &self.cancel;
            let pass = panic::catch_unwind(AssertUnwindSafe(|| {
                scheduler.tick(Instant::now());
                loop {
                    match commands.try_recv() {
                        Ok(command) => scheduler.execute(command),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            debug!("Engine handle dropped, shutting down");
                            cancel.cancel();
                            break;
                        }
                    }
                }
            }));
            if pass.is_err() {
                error!("Engine tick panicked, releasing output and stopping");
                self.publisher.emit(EngineEventKind::EngineError(
                    "engine tick panicked".into(),
                ));
                break;
            }

            next_tick += interval;
            let now = Instant::now();
            if next_tick > now {
                std::thread::sleep(next_tick - now);
            } else {
                if now - next_tick > interval {
                    debug!("Engine tick overran by {:?}", now - next_tick);
                }
                next_tick = now;
            }
        }

        scheduler.stop().finish();
        info!("Engine thread finished");
    }
}
