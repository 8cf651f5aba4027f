//! Desktop input backend on top of gilrs
//!
//! gilrs already normalizes pads to the standard layout, so every device
//! reports the same shape:
//!
//! ```text
//! axes    0 LeftStickX  1 LeftStickY  2 RightStickX  3 RightStickY
//!         4 LeftTrigger2 (0..1)       5 RightTrigger2 (0..1)
//! buttons 0 South  1 East  2 West  3 North  4 LeftTrigger  5 RightTrigger
//!         6 Select 7 Start 8 Mode 9 LeftThumb 10 RightThumb
//!         11 LeftTrigger2 12 RightTrigger2
//! hat 0   DPad
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use tracing::{debug, error, info, warn};

use super::backend::{DeviceBackend, DeviceError, DeviceInfo, HotplugEvent, HotplugSender};
use super::device::{Capabilities, DeviceId};
use super::input_state::{HatDirection, HatState, InputState};

const STICK_AXES: [Axis; 4] = [
    Axis::LeftStickX,
    Axis::LeftStickY,
    Axis::RightStickX,
    Axis::RightStickY,
];

const TRIGGER_AXES: [Button; 2] = [Button::LeftTrigger2, Button::RightTrigger2];

const BUTTONS: [Button; 13] = [
    Button::South,
    Button::East,
    Button::West,
    Button::North,
    Button::LeftTrigger,
    Button::RightTrigger,
    Button::Select,
    Button::Start,
    Button::Mode,
    Button::LeftThumb,
    Button::RightThumb,
    Button::LeftTrigger2,
    Button::RightTrigger2,
];

const DPAD: [(Button, HatDirection); 4] = [
    (Button::DPadUp, HatDirection::Up),
    (Button::DPadDown, HatDirection::Down),
    (Button::DPadLeft, HatDirection::Left),
    (Button::DPadRight, HatDirection::Right),
];

const CAPABILITIES: Capabilities = Capabilities {
    axes: (STICK_AXES.len() + TRIGGER_AXES.len()) as u8,
    buttons: BUTTONS.len() as u8,
    hats: 1,
};

pub struct GilrsBackend {
    gilrs: Gilrs,
    known: BTreeMap<DeviceId, GamepadId>,
    opened: BTreeSet<DeviceId>,
}

impl GilrsBackend {
    pub fn create() -> Result<Self, DeviceError> {
        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(DeviceError::Backend(e.to_string()));
            }
        };

        Ok(Self {
            gilrs,
            known: BTreeMap::new(),
            opened: BTreeSet::new(),
        })
    }

    fn describe(&mut self, gamepad_id: GamepadId) -> Option<DeviceInfo> {
        let id = DeviceId(usize::from(gamepad_id));
        let gamepad = self.gilrs.connected_gamepad(gamepad_id)?;
        let info = describe_gamepad(id, &gamepad);
        self.known.insert(id, gamepad_id);
        Some(info)
    }

    fn gamepad_id(&self, id: DeviceId) -> Result<GamepadId, DeviceError> {
        self.known.get(&id).copied().ok_or(DeviceError::Unknown(id))
    }
}

impl DeviceBackend for GilrsBackend {
    fn name(&self) -> &str {
        "gilrs"
    }

    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let ids: Vec<GamepadId> = self.gilrs.gamepads().map(|(id, _)| id).collect();
        let devices: Vec<DeviceInfo> = ids.into_iter().filter_map(|id| self.describe(id)).collect();

        if devices.is_empty() {
            warn!("No gamepad connected, waiting for hot-plug");
        } else {
            info!("Found {} gamepads:", devices.len());
            for (idx, device) in devices.iter().enumerate() {
                info!(
                    "  [{}] ID: {}, Name: {}, {:04x}:{:04x}",
                    idx, device.id, device.name, device.vendor, device.product
                );
            }
        }

        Ok(devices)
    }

    fn open(&mut self, id: DeviceId) -> Result<(), DeviceError> {
        let gamepad_id = self.gamepad_id(id)?;
        match self.gilrs.connected_gamepad(gamepad_id) {
            Some(gamepad) => {
                debug!("Opened gamepad {} ({})", gamepad.name(), id);
                self.opened.insert(id);
                Ok(())
            }
            None => Err(DeviceError::Open {
                device: id,
                reason: "gamepad is not connected".into(),
            }),
        }
    }

    fn close(&mut self, id: DeviceId) {
        if self.opened.remove(&id) {
            debug!("Closed gamepad {}", id);
        }
    }

    fn poll(&mut self, id: DeviceId, _timeout: Duration) -> Result<InputState, DeviceError> {
        // gilrs keeps a cached state that pump() refreshes, reads never block
        if !self.opened.contains(&id) {
            return Err(DeviceError::Read {
                device: id,
                reason: "device is not open".into(),
            });
        }
        let gamepad_id = self.gamepad_id(id)?;
        let gamepad = self
            .gilrs
            .connected_gamepad(gamepad_id)
            .ok_or_else(|| DeviceError::Read {
                device: id,
                reason: "gamepad vanished".into(),
            })?;

        Ok(read_state(&gamepad))
    }

    fn pump(&mut self, hotplug: &HotplugSender) {
        while let Some(Event { id, event, time, .. }) = self.gilrs.next_event() {
            match event {
                EventType::Connected => {
                    info!("Controller connected event detected: {}", id);
                    if let Some(info) = self.describe(id) {
                        if !hotplug.send(HotplugEvent::Connected(info)) {
                            error!("Hot-plug queue closed, dropping connect of {}", id);
                        }
                    }
                }
                EventType::Disconnected => {
                    warn!("Controller disconnected event detected: {}", id);
                    let device = DeviceId(usize::from(id));
                    self.opened.remove(&device);
                    if !hotplug.send(HotplugEvent::Disconnected(device)) {
                        error!("Hot-plug queue closed, dropping disconnect of {}", id);
                    }
                }
                _ => debug!("Processing gilrs event: {:?} at time: {:?}", event, time),
            }
        }
    }
}

fn describe_gamepad(id: DeviceId, gamepad: &Gamepad<'_>) -> DeviceInfo {
    DeviceInfo {
        id,
        vendor: gamepad.vendor_id().unwrap_or(0),
        product: gamepad.product_id().unwrap_or(0),
        name: gamepad.name().to_string(),
        capabilities: CAPABILITIES,
    }
}

fn read_state(gamepad: &Gamepad<'_>) -> InputState {
    let mut axes: Vec<f32> = STICK_AXES.iter().map(|axis| gamepad.value(*axis)).collect();
    axes.extend(TRIGGER_AXES.iter().map(|button| {
        gamepad
            .button_data(*button)
            .map(|data| data.value())
            .unwrap_or(0.0)
    }));

    let buttons = BUTTONS
        .iter()
        .enumerate()
        .filter(|(_, button)| gamepad.is_pressed(**button))
        .map(|(index, _)| index as u8);

    let hat = HatState::from_directions(
        DPAD.iter()
            .filter(|(button, _)| gamepad.is_pressed(*button))
            .map(|(_, direction)| *direction),
    );

    InputState::new(axes, buttons, vec![hat])
}
