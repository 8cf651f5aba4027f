//! Engine status and the event stream
//!
//! Everything the engine thread wants the outside world to see goes through a
//! [`Publisher`]: discrete happenings on a broadcast channel, current values
//! (status, active profile, devices, mode stack) on watch channels.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::controller::Device;
use crate::mapping::Profile;

/// Observable mirror of the scheduler state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStatus::Stopped => write!(f, "stopped"),
            EngineStatus::Starting => write!(f, "starting"),
            EngineStatus::Running => write!(f, "running"),
            EngineStatus::Stopping => write!(f, "stopping"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEventKind {
    DeviceConnected(Device),
    DeviceDisconnected(Device),
    ProfileActivated { name: String, revision: u32 },
    /// Active modes, default mode first
    ModeStackChanged(Vec<String>),
    StatusChanged(EngineStatus),
    /// Recoverable failure inside the running engine
    EngineError(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub at: DateTime<Local>,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn now(kind: EngineEventKind) -> Self {
        Self {
            at: Local::now(),
            kind,
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = self.at.format("%H:%M:%S%.3f");
        match &self.kind {
            EngineEventKind::DeviceConnected(device) => {
                write!(f, "[{}] connected {} ({})", at, device.name, device.key)
            }
            EngineEventKind::DeviceDisconnected(device) => {
                write!(f, "[{}] disconnected {} ({})", at, device.name, device.key)
            }
            EngineEventKind::ProfileActivated { name, revision } => {
                write!(f, "[{}] profile '{}' r{} active", at, name, revision)
            }
            EngineEventKind::ModeStackChanged(stack) => {
                write!(f, "[{}] modes: {}", at, stack.join(" > "))
            }
            EngineEventKind::StatusChanged(status) => write!(f, "[{}] engine {}", at, status),
            EngineEventKind::EngineError(message) => write!(f, "[{}] error: {}", at, message),
        }
    }
}

/// Sending half of every channel the engine publishes on
#[derive(Debug, Clone)]
pub struct Publisher {
    events: broadcast::Sender<EngineEvent>,
    status: Arc<watch::Sender<EngineStatus>>,
    profile: Arc<watch::Sender<Option<Arc<Profile>>>>,
    devices: Arc<watch::Sender<Vec<Device>>>,
    mode_stack: Arc<watch::Sender<Vec<String>>>,
}

impl Publisher {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            events,
            status: Arc::new(watch::Sender::new(EngineStatus::Stopped)),
            profile: Arc::new(watch::Sender::new(None)),
            devices: Arc::new(watch::Sender::new(Vec::new())),
            mode_stack: Arc::new(watch::Sender::new(Vec::new())),
        }
    }

    /// Sends an event; having no subscribers is not an error
    pub fn emit(&self, kind: EngineEventKind) {
        let event = EngineEvent::now(kind);
        debug!("Engine event: {}", event);
        let _ = self.events.send(event);
    }

    pub fn set_status(&self, status: EngineStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!("Engine status: {}", status);
            self.emit(EngineEventKind::StatusChanged(status));
        }
    }

    pub fn set_profile(&self, profile: Option<Arc<Profile>>) {
        self.profile.send_replace(profile);
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        self.devices.send_replace(devices);
    }

    pub fn set_mode_stack(&self, stack: Vec<String>) {
        let changed = self.mode_stack.send_if_modified(|current| {
            if *current == stack {
                false
            } else {
                *current = stack.clone();
                true
            }
        });
        if changed {
            self.emit(EngineEventKind::ModeStackChanged(stack));
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    pub fn profile(&self) -> Option<Arc<Profile>> {
        self.profile.borrow().clone()
    }

    pub fn watch_profile(&self) -> watch::Receiver<Option<Arc<Profile>>> {
        self.profile.subscribe()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.devices.borrow().clone()
    }

    pub fn mode_stack(&self) -> Vec<String> {
        self.mode_stack.borrow().clone()
    }
}
