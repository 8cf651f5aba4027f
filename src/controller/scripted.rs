//! In-memory input backend
//!
//! [`ScriptedBackend`] is driven through a cloneable [`ScriptedInput`] handle,
//! which can live on another thread than the engine. It backs the integration
//! tests and can replay recorded input without hardware.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error};

use super::backend::{DeviceBackend, DeviceError, DeviceInfo, HotplugEvent, HotplugSender};
use super::device::{Capabilities, DeviceId};
use super::input_state::InputState;

#[derive(Debug, Default)]
struct ScriptedDevice {
    info: Option<DeviceInfo>,
    state: InputState,
    failing_opens: u32,
    open_attempts: u32,
    failing_reads: bool,
    timing_out: bool,
    opened: bool,
}

#[derive(Debug, Default)]
struct Shared {
    devices: BTreeMap<DeviceId, ScriptedDevice>,
    pending: VecDeque<HotplugEvent>,
}

/// Handle used to script the devices of a [`ScriptedBackend`]
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend reading from this handle
    pub fn backend(&self) -> ScriptedBackend {
        ScriptedBackend {
            shared: self.shared.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a device that is already present when the backend enumerates
    pub fn add_device(&self, info: DeviceInfo) {
        let id = info.id;
        let mut shared = self.lock();
        shared.devices.entry(id).or_default().info = Some(info);
    }

    /// Plugs a device in and queues the hot-plug notification
    pub fn connect(&self, info: DeviceInfo) {
        let mut shared = self.lock();
        shared.pending.push_back(HotplugEvent::Connected(info.clone()));
        let device = shared.devices.entry(info.id).or_default();
        device.info = Some(info);
        device.state = InputState::default();
    }

    pub fn disconnect(&self, id: DeviceId) {
        let mut shared = self.lock();
        if let Some(device) = shared.devices.get_mut(&id) {
            device.info = None;
            device.opened = false;
        }
        shared.pending.push_back(HotplugEvent::Disconnected(id));
    }

    pub fn set_state(&self, id: DeviceId, state: InputState) {
        self.lock().devices.entry(id).or_default().state = state;
    }

    /// Makes the next `count` open attempts for `id` fail
    pub fn fail_opens(&self, id: DeviceId, count: u32) {
        self.lock().devices.entry(id).or_default().failing_opens = count;
    }

    pub fn fail_reads(&self, id: DeviceId, failing: bool) {
        self.lock().devices.entry(id).or_default().failing_reads = failing;
    }

    pub fn time_out(&self, id: DeviceId, timing_out: bool) {
        self.lock().devices.entry(id).or_default().timing_out = timing_out;
    }

    pub fn open_attempts(&self, id: DeviceId) -> u32 {
        self.lock()
            .devices
            .get(&id)
            .map(|device| device.open_attempts)
            .unwrap_or(0)
    }

    pub fn is_open(&self, id: DeviceId) -> bool {
        self.lock().devices.get(&id).is_some_and(|device| device.opened)
    }
}

/// Convenience descriptor for a scripted pad
pub fn scripted_pad(id: usize, vendor: u16, product: u16) -> DeviceInfo {
    DeviceInfo {
        id: DeviceId(id),
        vendor,
        product,
        name: format!("Scripted Pad {}", id),
        capabilities: Capabilities {
            axes: 6,
            buttons: 16,
            hats: 1,
        },
    }
}

pub struct ScriptedBackend {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedBackend {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let mut shared = self.lock();
        // present devices are reported here, queued connects would duplicate them
        shared.pending.clear();
        Ok(shared
            .devices
            .values()
            .filter_map(|device| device.info.clone())
            .collect())
    }

    fn open(&mut self, id: DeviceId) -> Result<(), DeviceError> {
        let mut shared = self.lock();
        let device = shared.devices.get_mut(&id).ok_or(DeviceError::Unknown(id))?;
        device.open_attempts += 1;

        if device.info.is_none() {
            return Err(DeviceError::Open {
                device: id,
                reason: "device is unplugged".into(),
            });
        }
        if device.failing_opens > 0 {
            device.failing_opens -= 1;
            return Err(DeviceError::Open {
                device: id,
                reason: "scripted open failure".into(),
            });
        }

        device.opened = true;
        debug!("Scripted device {} opened", id);
        Ok(())
    }

    fn close(&mut self, id: DeviceId) {
        if let Some(device) = self.lock().devices.get_mut(&id) {
            device.opened = false;
        }
    }

    fn poll(&mut self, id: DeviceId, _timeout: Duration) -> Result<InputState, DeviceError> {
        let shared = self.lock();
        let device = shared.devices.get(&id).ok_or(DeviceError::Unknown(id))?;

        if device.timing_out {
            return Err(DeviceError::Timeout(id));
        }
        if device.failing_reads || !device.opened {
            return Err(DeviceError::Read {
                device: id,
                reason: "stale handle".into(),
            });
        }
        Ok(device.state.clone())
    }

    fn pump(&mut self, hotplug: &HotplugSender) {
        let mut shared = self.lock();
        while let Some(event) = shared.pending.pop_front() {
            if !hotplug.send(event) {
                error!("Hot-plug queue closed, dropping scripted events");
                shared.pending.clear();
            }
        }
    }
}
