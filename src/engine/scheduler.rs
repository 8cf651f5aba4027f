//! Fixed-rate scheduler with statum state machine
//!
//! The scheduler owns every mutable piece of a running engine: the device
//! manager, the evaluator and the output sink. Only the engine thread touches
//! it, so none of these need locks.
//!
//! # State Machine
//!
//! ```text
//! Stopped ──► Starting ──► Running ──► Stopping ──► Stopped
//!                │
//!                └── no virtual device ──► (dropped, EngineError::StartFailed)
//! ```
//!
//! # Tick
//!
//! ```text
//! hot-plug ──► poll ──► evaluate ──► apply output ──► publish mode stack
//! ```
//!
//! Commands (profile switch, mode push/pop) are executed by the caller between
//! two ticks, never inside one.

use std::sync::Arc;
use std::time::Instant;

use statum::{machine, state};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::error::EngineError;
use super::events::{EngineEventKind, EngineStatus, Publisher};
use crate::config::EngineConfig;
use crate::controller::{
    DeviceBackend, DeviceEvent, DeviceManager, DeviceManagerSettings, HotplugSender,
};
use crate::mapping::{Evaluator, Profile};
use crate::output::{DeviceRequirements, OutputSink, VirtualDeviceProvider};

/// Requests executed on the engine thread between ticks
pub(crate) enum Command {
    SwitchProfile {
        profile: Profile,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    PushMode {
        mode: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    PopMode {
        reply: oneshot::Sender<Option<String>>,
    },
}

#[state]
#[derive(Debug, Clone)]
pub enum SchedulerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[machine]
pub struct Scheduler<S: SchedulerState> {
    config: EngineConfig,
    devices: DeviceManager,
    provider: Box<dyn VirtualDeviceProvider>,
    sink: Option<OutputSink>,
    evaluator: Evaluator,
    publisher: Publisher,
    last_tick: Option<Instant>,
    output_failing: bool,
}

impl<S: SchedulerState> Scheduler<S> {
    pub fn profile(&self) -> &Arc<Profile> {
        self.evaluator.profile()
    }

    pub fn mode_stack(&self) -> Vec<String> {
        self.evaluator.mode_stack()
    }

    /// Queue for hot-plug notifications raised outside the backend
    pub fn hotplug_sender(&self) -> HotplugSender {
        self.devices.hotplug_sender()
    }

    fn handle_device_events(&mut self, events: Vec<DeviceEvent>) {
        if events.is_empty() {
            return;
        }
        for event in events {
            match event {
                DeviceEvent::Connected(device) => {
                    info!("Device connected: {}", device);
                    self.publisher
                        .emit(EngineEventKind::DeviceConnected(device));
                }
                DeviceEvent::Disconnected(device) => {
                    info!("Device disconnected: {}", device);
                    self.evaluator.device_disconnected(&device.key);
                    self.publisher
                        .emit(EngineEventKind::DeviceDisconnected(device));
                }
            }
        }
        self.publisher.set_devices(self.devices.list_devices());
    }

    fn publish_mode_stack(&mut self) {
        if self.evaluator.take_stack_change() {
            self.publisher.set_mode_stack(self.evaluator.mode_stack());
        }
    }
}

impl Scheduler<Stopped> {
    pub fn create(
        config: EngineConfig,
        backend: Box<dyn DeviceBackend>,
        provider: Box<dyn VirtualDeviceProvider>,
        profile: Arc<Profile>,
        publisher: Publisher,
    ) -> Self {
        info!(
            "Creating scheduler for profile '{}' ({} input, {} output)",
            profile.name,
            backend.name(),
            provider.name()
        );
        let devices = DeviceManager::new(backend, DeviceManagerSettings::from(&config));
        let evaluator = Evaluator::new(profile, config.analog_combine);

        Self::new(
            config, devices, provider, None, evaluator, publisher, None, false,
        )
    }

    pub fn begin(self) -> Scheduler<Starting> {
        info!("Transitioning scheduler to Starting");
        self.publisher.set_status(EngineStatus::Starting);
        self.transition()
    }
}

impl Scheduler<Starting> {
    /// Opens the virtual device and the physical devices
    ///
    /// Physical devices are optional at this point, they can arrive later via
    /// hot-plug. The virtual device is not.
    pub fn acquire(mut self, now: Instant) -> Result<Scheduler<Running>, EngineError> {
        let requirements = DeviceRequirements::for_profile(self.evaluator.profile());
        debug!("Virtual device requirements: {}", requirements);

        let device = match self.provider.open(&requirements) {
            Ok(device) => device,
            Err(e) => {
                error!(
                    "No virtual device from '{}' for {}: {}",
                    self.provider.name(),
                    requirements,
                    e
                );
                self.publisher.set_status(EngineStatus::Stopped);
                return Err(EngineError::StartFailed(format!(
                    "no virtual device from '{}': {}",
                    self.provider.name(),
                    e
                )));
            }
        };
        self.sink = Some(OutputSink::new(device));

        match self.devices.start(now) {
            Ok(events) => self.handle_device_events(events),
            Err(e) => {
                warn!("Device enumeration failed, waiting for hot-plug: {}", e);
                self.publisher
                    .emit(EngineEventKind::EngineError(e.to_string()));
            }
        }
        self.publisher.set_devices(self.devices.list_devices());

        let profile = self.evaluator.profile().clone();
        self.publisher.set_profile(Some(profile.clone()));
        self.publisher.emit(EngineEventKind::ProfileActivated {
            name: profile.name.clone(),
            revision: profile.revision,
        });
        self.evaluator.take_stack_change();
        self.publisher.set_mode_stack(self.evaluator.mode_stack());

        info!("Transitioning scheduler to Running");
        self.publisher.set_status(EngineStatus::Running);
        Ok(self.transition())
    }
}

impl Scheduler<Running> {
    /// Runs one pass of the pipeline
    pub fn tick(&mut self, now: Instant) {
        let dt = match self.last_tick {
            Some(previous) => now.saturating_duration_since(previous),
            None => self.config.tick_interval(),
        };
        self.last_tick = Some(now);

        let plugged = self.devices.process_hotplug(now);
        self.handle_device_events(plugged);

        let polled = self.devices.poll_all(now);
        self.handle_device_events(polled.events);

        let output = self.evaluator.evaluate(&polled.inputs, dt);

        if let Some(sink) = self.sink.as_mut() {
            match sink.apply(&output) {
                Ok(()) => {
                    if self.output_failing {
                        info!("Virtual device writes recovered");
                        self.output_failing = false;
                    }
                }
                Err(e) if self.output_failing => debug!("Virtual device write failed again: {}", e),
                Err(e) => {
                    warn!("Virtual device write failed: {}", e);
                    self.output_failing = true;
                    self.publisher
                        .emit(EngineEventKind::EngineError(e.to_string()));
                }
            }
        }

        self.publish_mode_stack();
    }

    pub(crate) fn execute(&mut self, command: Command) {
        match command {
            Command::SwitchProfile { profile, reply } => {
                let result = self.switch_profile(profile);
                if let Err(e) = &result {
                    warn!("Profile switch rejected: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::PushMode { mode, reply } => {
                let result = self.push_mode(&mode);
                let _ = reply.send(result);
            }
            Command::PopMode { reply } => {
                let _ = reply.send(self.pop_mode());
            }
        }
    }

    /// Activates `profile`, reopening the virtual device if it needs more
    ///
    /// On any error the previous profile and device stay in force.
    pub fn switch_profile(&mut self, profile: Profile) -> Result<(), EngineError> {
        profile.validate()?;

        let requirements = DeviceRequirements::for_profile(&profile);
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| EngineError::StartFailed("no virtual device open".into()))?;
        let offered = sink.capabilities();
        if !requirements.covered_by(&offered) {
            let wanted = requirements.merged(&offered);
            info!(
                "Profile '{}' needs {}, reopening virtual device as {}",
                profile.name, requirements, wanted
            );
            let device = self.provider.open(&wanted)?;
            sink.replace_device(device);
        }

        let profile = Arc::new(profile);
        self.evaluator.switch_profile(profile.clone());
        self.publisher.set_profile(Some(profile.clone()));
        self.publisher.emit(EngineEventKind::ProfileActivated {
            name: profile.name.clone(),
            revision: profile.revision,
        });
        self.evaluator.take_stack_change();
        self.publisher.set_mode_stack(self.evaluator.mode_stack());
        info!(
            "Profile '{}' (revision {}) active",
            profile.name, profile.revision
        );
        Ok(())
    }

    pub fn push_mode(&mut self, mode: &str) -> Result<(), EngineError> {
        self.evaluator.push_mode(mode)?;
        self.publish_mode_stack();
        Ok(())
    }

    pub fn pop_mode(&mut self) -> Option<String> {
        let popped = self.evaluator.pop_mode();
        self.publish_mode_stack();
        popped
    }

    pub fn stop(self) -> Scheduler<Stopping> {
        info!("Transitioning scheduler to Stopping");
        self.publisher.set_status(EngineStatus::Stopping);
        self.transition()
    }
}

impl Scheduler<Stopping> {
    /// Releases all output and closes devices; never fails
    pub fn finish(mut self) -> Scheduler<Stopped> {
        if let Some(mut sink) = self.sink.take() {
            match sink.release() {
                Ok(()) => debug!("Virtual output released"),
                Err(e) => warn!("Failed to release virtual output: {}", e),
            }
        }
        self.devices.shutdown();
        self.publisher.set_devices(Vec::new());
        self.last_tick = None;

        info!("Transitioning scheduler to Stopped");
        self.publisher.set_status(EngineStatus::Stopped);
        self.transition()
    }
}
