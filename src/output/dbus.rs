//! Session-bus integrations
//!
//! [`InputPlumberProvider`] asks the InputPlumber service to create target
//! keyboard and mouse devices and drives them with method calls, so no write
//! access to `/dev/uinput` is needed. [`ScreenSaverInhibitor`] keeps the
//! session awake while the engine runs.

use tracing::{debug, info, warn};
use zbus::blocking::{Connection, Proxy};
use zbus::zvariant::OwnedObjectPath;

use super::error::OutputError;
use super::virtual_device::{DeviceRequirements, VirtualDevice, VirtualDeviceProvider};
use crate::mapping::{Key, MouseButton, VirtualAxis};

const INPUTPLUMBER_SERVICE: &str = "org.shadowblip.InputPlumber";
const INPUTPLUMBER_MANAGER_PATH: &str = "/org/shadowblip/InputPlumber/Manager";
const INPUTPLUMBER_MANAGER_IFACE: &str = "org.shadowblip.InputManager";
const INPUTPLUMBER_KEYBOARD_IFACE: &str = "org.shadowblip.Input.Keyboard";
const INPUTPLUMBER_MOUSE_IFACE: &str = "org.shadowblip.Input.Mouse";

const CREATE_TARGET_DEVICE: &str = "CreateTargetDevice";
const STOP_TARGET_DEVICE: &str = "StopTargetDevice";
const SEND_KEY: &str = "SendKey";
const MOVE_CURSOR: &str = "MoveCursor";

const SCREENSAVER_SERVICE: &str = "org.freedesktop.ScreenSaver";
const SCREENSAVER_PATH: &str = "/org/freedesktop/ScreenSaver";
const SCREENSAVER_IFACE: &str = "org.freedesktop.ScreenSaver";

fn bus_error(error: zbus::Error) -> OutputError {
    OutputError::Bus(error.to_string())
}

fn mouse_button_name(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "BTN_LEFT",
        MouseButton::Right => "BTN_RIGHT",
        MouseButton::Middle => "BTN_MIDDLE",
    }
}

#[derive(Debug, Default)]
pub struct InputPlumberProvider;

impl InputPlumberProvider {
    pub fn new() -> Self {
        Self
    }
}

impl VirtualDeviceProvider for InputPlumberProvider {
    fn name(&self) -> &str {
        "input_plumber"
    }

    fn open(
        &mut self,
        requirements: &DeviceRequirements,
    ) -> Result<Box<dyn VirtualDevice>, OutputError> {
        if requirements.needs_gamepad() {
            return Err(OutputError::Unavailable(format!(
                "InputPlumber output has no gamepad target ({})",
                requirements
            )));
        }

        let conn = Connection::session().map_err(|e| {
            OutputError::Unavailable(format!("No session bus for InputPlumber: {}", e))
        })?;
        let manager = Proxy::new(
            &conn,
            INPUTPLUMBER_SERVICE,
            INPUTPLUMBER_MANAGER_PATH,
            INPUTPLUMBER_MANAGER_IFACE,
        )
        .map_err(|e| OutputError::Unavailable(format!("InputPlumber not reachable: {}", e)))?;

        let mut output = InputPlumberOutput {
            conn,
            manager,
            keyboard: None,
            mouse: None,
        };
        // Keyboard targets also carry the mouse buttons
        if requirements.keyboard || requirements.mouse {
            output.keyboard = Some(output.create_target("keyboard", INPUTPLUMBER_KEYBOARD_IFACE)?);
        }
        if requirements.mouse {
            output.mouse = Some(output.create_target("mouse", INPUTPLUMBER_MOUSE_IFACE)?);
        }

        info!(
            "InputPlumber targets created (keyboard: {}, mouse: {})",
            output.keyboard.is_some(),
            output.mouse.is_some()
        );
        Ok(Box::new(output))
    }
}

struct Target {
    path: OwnedObjectPath,
    proxy: Proxy<'static>,
}

struct InputPlumberOutput {
    conn: Connection,
    manager: Proxy<'static>,
    keyboard: Option<Target>,
    mouse: Option<Target>,
}

impl InputPlumberOutput {
    fn create_target(&self, kind: &str, iface: &'static str) -> Result<Target, OutputError> {
        let path: OwnedObjectPath = self
            .manager
            .call(CREATE_TARGET_DEVICE, &(kind,))
            .map_err(|e| {
                OutputError::Unavailable(format!("InputPlumber refused {} target: {}", kind, e))
            })?;
        let proxy = Proxy::new(&self.conn, INPUTPLUMBER_SERVICE, path.clone(), iface)
            .map_err(bus_error)?;
        debug!("InputPlumber {} target at {}", kind, path.as_str());
        Ok(Target { path, proxy })
    }

    fn send_key(&self, name: &str, pressed: bool) -> Result<(), OutputError> {
        let keyboard = self
            .keyboard
            .as_ref()
            .ok_or_else(|| OutputError::Unsupported("InputPlumber output without keyboard".into()))?;
        let _: () = keyboard
            .proxy
            .call(SEND_KEY, &(name, pressed))
            .map_err(bus_error)?;
        Ok(())
    }
}

impl VirtualDevice for InputPlumberOutput {
    fn capabilities(&self) -> DeviceRequirements {
        DeviceRequirements {
            axes: 0,
            buttons: 0,
            keyboard: self.keyboard.is_some(),
            mouse: self.mouse.is_some(),
        }
    }

    fn set_axis(&mut self, axis: VirtualAxis, _value: f32) -> Result<(), OutputError> {
        Err(OutputError::Unsupported(format!(
            "InputPlumber output axis {:?}",
            axis
        )))
    }

    fn set_button(&mut self, button: u8, _pressed: bool) -> Result<(), OutputError> {
        Err(OutputError::Unsupported(format!(
            "InputPlumber output joystick button {}",
            button
        )))
    }

    fn set_key(&mut self, key: Key, pressed: bool) -> Result<(), OutputError> {
        self.send_key(key.evdev_name(), pressed)
    }

    fn set_mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<(), OutputError> {
        self.send_key(mouse_button_name(button), pressed)
    }

    fn move_cursor(&mut self, dx: i32, dy: i32) -> Result<(), OutputError> {
        let mouse = self
            .mouse
            .as_ref()
            .ok_or_else(|| OutputError::Unsupported("InputPlumber output without mouse".into()))?;
        let _: () = mouse
            .proxy
            .call(MOVE_CURSOR, &(dx, dy))
            .map_err(bus_error)?;
        Ok(())
    }

    fn scroll(&mut self, clicks: i32) -> Result<(), OutputError> {
        debug!("InputPlumber has no scroll method, dropping {} clicks", clicks);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn release_all(&mut self) -> Result<(), OutputError> {
        if self.keyboard.is_none() {
            return Ok(());
        }
        for key in Key::ALL {
            self.send_key(key.evdev_name(), false)?;
        }
        for button in [MouseButton::Left, MouseButton::Right, MouseButton::Middle] {
            self.send_key(mouse_button_name(button), false)?;
        }
        Ok(())
    }
}

impl Drop for InputPlumberOutput {
    fn drop(&mut self) {
        for target in self.keyboard.iter().chain(self.mouse.iter()) {
            let stopped: Result<(), zbus::Error> = self
                .manager
                .call(STOP_TARGET_DEVICE, &(&target.path,));
            if let Err(e) = stopped {
                warn!(
                    "Failed to stop InputPlumber target {}: {}",
                    target.path.as_str(),
                    e
                );
            }
        }
    }
}

/// Holds a screensaver inhibition until dropped
pub struct ScreenSaverInhibitor {
    proxy: Proxy<'static>,
    cookie: u32,
}

impl ScreenSaverInhibitor {
    pub fn inhibit(application: &str, reason: &str) -> Result<Self, OutputError> {
        let conn = Connection::session().map_err(bus_error)?;
        let proxy = Proxy::new(&conn, SCREENSAVER_SERVICE, SCREENSAVER_PATH, SCREENSAVER_IFACE)
            .map_err(bus_error)?;
        let cookie: u32 = proxy
            .call("Inhibit", &(application, reason))
            .map_err(bus_error)?;
        info!("Screensaver inhibited (cookie {})", cookie);
        Ok(Self { proxy, cookie })
    }
}

impl Drop for ScreenSaverInhibitor {
    fn drop(&mut self) {
        let released: Result<(), zbus::Error> = self.proxy.call("UnInhibit", &(self.cookie,));
        match released {
            Ok(()) => debug!("Screensaver inhibition {} released", self.cookie),
            Err(e) => warn!("Failed to release screensaver inhibition: {}", e),
        }
    }
}
