//! Device lifecycle: enumeration, hot-plug, open retries and polling
//!
//! ```text
//!            open ok                         Disconnected (hot-plug)
//! pending ───────────► Connected ─────────────────────────────► removed
//!   ▲  │ open failed      │ read failed
//!   │  ▼                  │ (implicit disconnect)
//!  backoff ◄──────────────┘
//! ```
//!
//! A device only counts as connected once its backend handle is open. Failed
//! opens are retried with exponential backoff; a failed read drops the device
//! back to pending so it is reopened the same way. A timed out poll only drops
//! the device's input for that tick.
//!
//! When the hot-plug queue overflows, the backend is enumerated again and the
//! device table reconciled against it.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::backend::{
    hotplug_channel, DeviceBackend, DeviceError, DeviceInfo, HotplugEvent, HotplugReceiver,
    HotplugSender,
};
use super::device::{ConnectionState, Device, DeviceId, DeviceKey};
use super::input_state::InputState;
use crate::config::EngineConfig;

const HOTPLUG_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct DeviceManagerSettings {
    pub poll_timeout: Duration,
    pub retry_initial: Duration,
    pub retry_max: Duration,
}

impl Default for DeviceManagerSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for DeviceManagerSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            poll_timeout: config.poll_timeout(),
            retry_initial: config.open_retry_initial(),
            retry_max: config.open_retry_max(),
        }
    }
}

/// Connection changes reported to the scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Connected(Device),
    Disconnected(Device),
}

/// Result of polling every connected device once
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub inputs: Vec<(DeviceKey, InputState)>,
    pub events: Vec<DeviceEvent>,
}

#[derive(Debug, Clone, Copy)]
struct Retry {
    due: Instant,
    delay: Duration,
}

struct Tracked {
    device: Device,
    retry: Option<Retry>,
}

pub struct DeviceManager {
    backend: Box<dyn DeviceBackend>,
    settings: DeviceManagerSettings,
    devices: BTreeMap<DeviceId, Tracked>,
    hotplug_tx: HotplugSender,
    hotplug_rx: HotplugReceiver,
}

impl DeviceManager {
    pub fn new(backend: Box<dyn DeviceBackend>, settings: DeviceManagerSettings) -> Self {
        let (hotplug_tx, hotplug_rx) = hotplug_channel(HOTPLUG_CAPACITY);
        debug!(
            "Creating device manager on backend '{}' with settings: {:?}",
            backend.name(),
            settings
        );
        Self {
            backend,
            settings,
            devices: BTreeMap::new(),
            hotplug_tx,
            hotplug_rx,
        }
    }

    /// Sender for injecting hot-plug notifications from other threads
    pub fn hotplug_sender(&self) -> HotplugSender {
        self.hotplug_tx.clone()
    }

    /// Enumerates present devices and tries to open each of them
    pub fn start(&mut self, now: Instant) -> Result<Vec<DeviceEvent>, DeviceError> {
        let found = self.backend.enumerate()?;
        info!(
            "Backend '{}' enumerated {} devices",
            self.backend.name(),
            found.len()
        );

        let mut events = Vec::new();
        for info in found {
            self.register(info, now, &mut events);
        }
        Ok(events)
    }

    /// Connected devices with their capability descriptors
    pub fn list_devices(&self) -> Vec<Device> {
        self.devices
            .values()
            .filter(|tracked| tracked.device.is_connected())
            .map(|tracked| tracked.device.clone())
            .collect()
    }

    /// Drains the hot-plug queue and retries opens that are due
    pub fn process_hotplug(&mut self, now: Instant) -> Vec<DeviceEvent> {
        self.backend.pump(&self.hotplug_tx);

        let mut events = Vec::new();
        while let Some(event) = self.hotplug_rx.try_recv() {
            match event {
                HotplugEvent::Connected(info) => self.register(info, now, &mut events),
                HotplugEvent::Disconnected(id) => self.remove(id, &mut events),
            }
        }
        if self.hotplug_rx.take_overflow() {
            self.rescan(now, &mut events);
        }

        let due: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|(_, tracked)| tracked.retry.is_some_and(|retry| retry.due <= now))
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            self.try_open(id, now, &mut events);
        }

        events
    }

    /// Reads one device
    ///
    /// # Errors
    ///
    /// [`DeviceError::Read`] for a stale handle, [`DeviceError::Unknown`] if the
    /// device is not connected.
    pub fn poll(&mut self, id: DeviceId) -> Result<InputState, DeviceError> {
        match self.devices.get(&id) {
            Some(tracked) if tracked.device.is_connected() => {
                self.backend.poll(id, self.settings.poll_timeout)
            }
            _ => Err(DeviceError::Unknown(id)),
        }
    }

    /// Polls every connected device once
    ///
    /// A timed out device is left out of this tick's inputs and polled again
    /// next tick. A read failure is an implicit disconnect and schedules a
    /// reopen.
    pub fn poll_all(&mut self, now: Instant) -> PollOutcome {
        let mut outcome = PollOutcome::default();
        let connected: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|(_, tracked)| tracked.device.is_connected())
            .map(|(id, _)| *id)
            .collect();

        for id in connected {
            let result = self.backend.poll(id, self.settings.poll_timeout);
            let Some(tracked) = self.devices.get_mut(&id) else {
                continue;
            };

            match result {
                Ok(state) => outcome.inputs.push((tracked.device.key, state)),
                Err(DeviceError::Timeout(_)) => {
                    debug!("Poll timed out for {}, skipping it this tick", tracked.device);
                }
                Err(e) => {
                    warn!("Lost {}: {}", tracked.device, e);
                    tracked.device.state = ConnectionState::Disconnected;
                    tracked.retry = Some(Retry {
                        due: now + self.settings.retry_initial,
                        delay: self.settings.retry_initial,
                    });
                    outcome
                        .events
                        .push(DeviceEvent::Disconnected(tracked.device.clone()));
                    self.backend.close(id);
                }
            }
        }

        outcome
    }

    /// Closes every device handle
    pub fn shutdown(&mut self) {
        info!("Closing {} devices", self.devices.len());
        for (id, tracked) in self.devices.iter_mut() {
            if tracked.device.is_connected() {
                self.backend.close(*id);
            }
            tracked.device.state = ConnectionState::Disconnected;
        }
        self.devices.clear();
    }

    fn register(&mut self, info: DeviceInfo, now: Instant, events: &mut Vec<DeviceEvent>) {
        if self.devices.contains_key(&info.id) {
            debug!("Device {} already known, ignoring connect", info.id);
            return;
        }

        let instance = self.free_instance(info.vendor, info.product);
        let device = Device {
            id: info.id,
            key: DeviceKey::new(info.vendor, info.product, instance),
            name: info.name,
            capabilities: info.capabilities,
            state: ConnectionState::Disconnected,
        };
        debug!("Registered {} as {}", device.name, device.key);

        self.devices.insert(
            info.id,
            Tracked {
                device,
                retry: None,
            },
        );
        self.try_open(info.id, now, events);
    }

    /// Reconciles the device table with a fresh enumeration
    fn rescan(&mut self, now: Instant, events: &mut Vec<DeviceEvent>) {
        let found = match self.backend.enumerate() {
            Ok(found) => found,
            Err(e) => {
                warn!("Rescan after hot-plug overflow failed: {}", e);
                return;
            }
        };
        info!("Hot-plug queue overflowed, rescanned {} devices", found.len());

        let gone: Vec<DeviceId> = self
            .devices
            .keys()
            .filter(|id| !found.iter().any(|info| info.id == **id))
            .copied()
            .collect();
        for id in gone {
            self.remove(id, events);
        }
        for info in found {
            if !self.devices.contains_key(&info.id) {
                self.register(info, now, events);
            }
        }
    }

    fn remove(&mut self, id: DeviceId, events: &mut Vec<DeviceEvent>) {
        let Some(mut tracked) = self.devices.remove(&id) else {
            debug!("Disconnect for unknown device {}", id);
            return;
        };

        if tracked.device.is_connected() {
            self.backend.close(id);
            tracked.device.state = ConnectionState::Disconnected;
            info!("Device disconnected: {}", tracked.device);
            events.push(DeviceEvent::Disconnected(tracked.device));
        } else {
            debug!("Pending device {} unplugged before it opened", tracked.device);
        }
    }

    fn try_open(&mut self, id: DeviceId, now: Instant, events: &mut Vec<DeviceEvent>) {
        let result = self.backend.open(id);
        let Some(tracked) = self.devices.get_mut(&id) else {
            return;
        };

        match result {
            Ok(()) => {
                tracked.device.state = ConnectionState::Connected;
                tracked.retry = None;
                info!("Device connected: {}", tracked.device);
                events.push(DeviceEvent::Connected(tracked.device.clone()));
            }
            Err(e) => {
                let delay = match tracked.retry {
                    Some(retry) => (retry.delay * 2).min(self.settings.retry_max),
                    None => self.settings.retry_initial,
                };
                warn!(
                    "Failed to open {}: {}, retrying in {:?}",
                    tracked.device, e, delay
                );
                tracked.retry = Some(Retry {
                    due: now + delay,
                    delay,
                });
            }
        }
    }

    fn free_instance(&self, vendor: u16, product: u16) -> u8 {
        let used: Vec<u8> = self
            .devices
            .values()
            .map(|tracked| tracked.device.key)
            .filter(|key| key.vendor == vendor && key.product == product)
            .map(|key| key.instance)
            .collect();
        (0..=u8::MAX)
            .find(|candidate| !used.contains(candidate))
            .unwrap_or(u8::MAX)
    }
}
