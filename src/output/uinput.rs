//! Kernel virtual devices through `/dev/uinput`
//!
//! Opens up to two devices: a gamepad with absolute axes and joystick buttons,
//! and a combined keyboard/mouse. Events are buffered per device and emitted
//! as one frame on `flush`.

use evdev::uinput::VirtualDevice as UinputDevice;
use evdev::{
    AbsInfo, AbsoluteAxisCode, AttributeSet, EventType, InputEvent, KeyCode, RelativeAxisCode,
    UinputAbsSetup,
};
use tracing::{debug, info};

use super::error::OutputError;
use super::virtual_device::{DeviceRequirements, VirtualDevice, VirtualDeviceProvider};
use crate::mapping::{Key, MouseButton, VirtualAxis, MAX_VIRTUAL_BUTTONS};

const AXIS_MIN: i32 = -32768;
const AXIS_MAX: i32 = 32767;

const BTN_TRIGGER: u16 = 0x120;
const BTN_DEAD: u16 = 0x12f;
const BTN_TRIGGER_HAPPY1: u16 = 0x2c0;

fn axis_code(axis: VirtualAxis) -> AbsoluteAxisCode {
    match axis {
        VirtualAxis::X => AbsoluteAxisCode::ABS_X,
        VirtualAxis::Y => AbsoluteAxisCode::ABS_Y,
        VirtualAxis::Z => AbsoluteAxisCode::ABS_Z,
        VirtualAxis::Rx => AbsoluteAxisCode::ABS_RX,
        VirtualAxis::Ry => AbsoluteAxisCode::ABS_RY,
        VirtualAxis::Rz => AbsoluteAxisCode::ABS_RZ,
        VirtualAxis::Throttle => AbsoluteAxisCode::ABS_THROTTLE,
        VirtualAxis::Rudder => AbsoluteAxisCode::ABS_RUDDER,
    }
}

/// BTN_TRIGGER..BTN_BASE6, BTN_DEAD, then BTN_TRIGGER_HAPPY1..40
fn button_code(button: u8) -> KeyCode {
    let code = match button {
        0..=11 => BTN_TRIGGER + u16::from(button),
        12 => BTN_DEAD,
        _ => BTN_TRIGGER_HAPPY1 + u16::from(button - 13),
    };
    KeyCode::new(code)
}

fn mouse_code(button: MouseButton) -> KeyCode {
    match button {
        MouseButton::Left => KeyCode::BTN_LEFT,
        MouseButton::Right => KeyCode::BTN_RIGHT,
        MouseButton::Middle => KeyCode::BTN_MIDDLE,
    }
}

fn axis_value(value: f32) -> i32 {
    let scaled = value.clamp(-1.0, 1.0) * AXIS_MAX as f32;
    (scaled.round() as i32).clamp(AXIS_MIN, AXIS_MAX)
}

fn unavailable(what: &str, error: std::io::Error) -> OutputError {
    OutputError::Unavailable(format!("Failed to create uinput {}: {}", what, error))
}

#[derive(Debug, Clone)]
pub struct UinputProvider {
    name: String,
}

impl UinputProvider {
    /// `name` prefixes the device names shown to the system
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn open_gamepad(&self) -> Result<UinputDevice, OutputError> {
        let mut buttons = AttributeSet::<KeyCode>::new();
        for button in 0..MAX_VIRTUAL_BUTTONS {
            buttons.insert(button_code(button));
        }

        let name = format!("{} Gamepad", self.name);
        let mut builder = UinputDevice::builder()
            .map_err(|e| unavailable("builder", e))?
            .name(&name)
            .with_keys(&buttons)
            .map_err(|e| unavailable("gamepad buttons", e))?;
        for axis in VirtualAxis::ALL {
            let setup = UinputAbsSetup::new(
                axis_code(axis),
                AbsInfo::new(0, AXIS_MIN, AXIS_MAX, 16, 128, 0),
            );
            builder = builder
                .with_absolute_axis(&setup)
                .map_err(|e| unavailable("gamepad axes", e))?;
        }
        builder.build().map_err(|e| unavailable("gamepad", e))
    }

    fn open_keyboard_mouse(&self) -> Result<UinputDevice, OutputError> {
        let mut keys = AttributeSet::<KeyCode>::new();
        for key in Key::ALL {
            keys.insert(KeyCode::new(key.code()));
        }
        for button in [MouseButton::Left, MouseButton::Right, MouseButton::Middle] {
            keys.insert(mouse_code(button));
        }
        let mut relative = AttributeSet::<RelativeAxisCode>::new();
        relative.insert(RelativeAxisCode::REL_X);
        relative.insert(RelativeAxisCode::REL_Y);
        relative.insert(RelativeAxisCode::REL_WHEEL);

        let name = format!("{} Keyboard/Mouse", self.name);
        UinputDevice::builder()
            .map_err(|e| unavailable("builder", e))?
            .name(&name)
            .with_keys(&keys)
            .map_err(|e| unavailable("keys", e))?
            .with_relative_axes(&relative)
            .map_err(|e| unavailable("relative axes", e))?
            .build()
            .map_err(|e| unavailable("keyboard/mouse", e))
    }
}

impl VirtualDeviceProvider for UinputProvider {
    fn name(&self) -> &str {
        "uinput"
    }

    fn open(
        &mut self,
        requirements: &DeviceRequirements,
    ) -> Result<Box<dyn VirtualDevice>, OutputError> {
        let gamepad = if requirements.needs_gamepad() {
            Some(Channel::new(self.open_gamepad()?))
        } else {
            None
        };
        let keyboard_mouse = if requirements.keyboard || requirements.mouse {
            Some(Channel::new(self.open_keyboard_mouse()?))
        } else {
            None
        };

        info!(
            "uinput devices '{}' created (gamepad: {}, keyboard/mouse: {})",
            self.name,
            gamepad.is_some(),
            keyboard_mouse.is_some()
        );
        Ok(Box::new(UinputOutput {
            gamepad,
            keyboard_mouse,
        }))
    }
}

struct Channel {
    device: UinputDevice,
    pending: Vec<InputEvent>,
}

impl Channel {
    fn new(device: UinputDevice) -> Self {
        Self {
            device,
            pending: Vec::new(),
        }
    }

    fn push(&mut self, kind: EventType, code: u16, value: i32) {
        self.pending.push(InputEvent::new(kind.0, code, value));
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let result = self.device.emit(&self.pending);
        self.pending.clear();
        result.map_err(OutputError::from)
    }
}

struct UinputOutput {
    gamepad: Option<Channel>,
    keyboard_mouse: Option<Channel>,
}

impl UinputOutput {
    fn gamepad(&mut self) -> Result<&mut Channel, OutputError> {
        self.gamepad
            .as_mut()
            .ok_or_else(|| OutputError::Unsupported("uinput output without gamepad".into()))
    }

    fn keyboard_mouse(&mut self) -> Result<&mut Channel, OutputError> {
        self.keyboard_mouse
            .as_mut()
            .ok_or_else(|| OutputError::Unsupported("uinput output without keyboard/mouse".into()))
    }
}

impl VirtualDevice for UinputOutput {
    fn capabilities(&self) -> DeviceRequirements {
        let gamepad = self.gamepad.is_some();
        let keyboard_mouse = self.keyboard_mouse.is_some();
        DeviceRequirements {
            axes: if gamepad { VirtualAxis::ALL.len() as u8 } else { 0 },
            buttons: if gamepad { MAX_VIRTUAL_BUTTONS } else { 0 },
            keyboard: keyboard_mouse,
            mouse: keyboard_mouse,
        }
    }

    fn set_axis(&mut self, axis: VirtualAxis, value: f32) -> Result<(), OutputError> {
        self.gamepad()?
            .push(EventType::ABSOLUTE, axis_code(axis).0, axis_value(value));
        Ok(())
    }

    fn set_button(&mut self, button: u8, pressed: bool) -> Result<(), OutputError> {
        if button >= MAX_VIRTUAL_BUTTONS {
            return Err(OutputError::Unsupported(format!("joystick button {}", button)));
        }
        self.gamepad()?
            .push(EventType::KEY, button_code(button).0, i32::from(pressed));
        Ok(())
    }

    fn set_key(&mut self, key: Key, pressed: bool) -> Result<(), OutputError> {
        self.keyboard_mouse()?
            .push(EventType::KEY, key.code(), i32::from(pressed));
        Ok(())
    }

    fn set_mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<(), OutputError> {
        self.keyboard_mouse()?
            .push(EventType::KEY, mouse_code(button).0, i32::from(pressed));
        Ok(())
    }

    fn move_cursor(&mut self, dx: i32, dy: i32) -> Result<(), OutputError> {
        let channel = self.keyboard_mouse()?;
        if dx != 0 {
            channel.push(EventType::RELATIVE, RelativeAxisCode::REL_X.0, dx);
        }
        if dy != 0 {
            channel.push(EventType::RELATIVE, RelativeAxisCode::REL_Y.0, dy);
        }
        Ok(())
    }

    fn scroll(&mut self, clicks: i32) -> Result<(), OutputError> {
        self.keyboard_mouse()?
            .push(EventType::RELATIVE, RelativeAxisCode::REL_WHEEL.0, clicks);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        if let Some(channel) = self.gamepad.as_mut() {
            channel.flush()?;
        }
        if let Some(channel) = self.keyboard_mouse.as_mut() {
            channel.flush()?;
        }
        Ok(())
    }

    fn release_all(&mut self) -> Result<(), OutputError> {
        if let Some(channel) = self.gamepad.as_mut() {
            for axis in VirtualAxis::ALL {
                channel.push(EventType::ABSOLUTE, axis_code(axis).0, 0);
            }
            for button in 0..MAX_VIRTUAL_BUTTONS {
                channel.push(EventType::KEY, button_code(button).0, 0);
            }
        }
        if let Some(channel) = self.keyboard_mouse.as_mut() {
            for key in Key::ALL {
                channel.push(EventType::KEY, key.code(), 0);
            }
            for button in [MouseButton::Left, MouseButton::Right, MouseButton::Middle] {
                channel.push(EventType::KEY, mouse_code(button).0, 0);
            }
        }
        debug!("uinput release frame queued");
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joystick_buttons_skip_the_gap_after_dead() {
        assert_eq!(button_code(0).0, BTN_TRIGGER);
        assert_eq!(button_code(11).0, 0x12b);
        assert_eq!(button_code(12).0, BTN_DEAD);
        assert_eq!(button_code(13).0, BTN_TRIGGER_HAPPY1);
        assert_eq!(button_code(MAX_VIRTUAL_BUTTONS - 1).0, 0x2e7);
    }

    #[test]
    fn axis_values_span_the_full_range() {
        assert_eq!(axis_value(0.0), 0);
        assert_eq!(axis_value(1.0), AXIS_MAX);
        assert_eq!(axis_value(-1.0), -AXIS_MAX);
        assert_eq!(axis_value(7.0), AXIS_MAX);
    }
}
