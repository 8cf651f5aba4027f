//! Contract between the output sink and concrete virtual devices

use std::fmt;

use super::error::OutputError;
use crate::mapping::{Key, MouseButton, OutputUse, Profile, VirtualAxis};

/// What a profile needs from the virtual devices, or what an open device offers
///
/// `axes` and `buttons` are counts: a device with `axes == 3` exposes X, Y and Z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceRequirements {
    pub axes: u8,
    pub buttons: u8,
    pub keyboard: bool,
    pub mouse: bool,
}

impl DeviceRequirements {
    pub fn for_profile(profile: &Profile) -> Self {
        let mut requirements = Self::default();
        for output in profile.output_uses() {
            match output {
                OutputUse::Axis(axis) => {
                    requirements.axes = requirements.axes.max(axis.index() + 1)
                }
                OutputUse::Button(button) => {
                    requirements.buttons = requirements.buttons.max(button.saturating_add(1))
                }
                OutputUse::Keyboard => requirements.keyboard = true,
                OutputUse::MouseButton | OutputUse::Cursor | OutputUse::Scroll => {
                    requirements.mouse = true
                }
            }
        }
        requirements
    }

    /// Whether a device offering `offered` can serve these requirements
    pub fn covered_by(&self, offered: &DeviceRequirements) -> bool {
        self.axes <= offered.axes
            && self.buttons <= offered.buttons
            && (!self.keyboard || offered.keyboard)
            && (!self.mouse || offered.mouse)
    }

    pub fn needs_gamepad(&self) -> bool {
        self.axes > 0 || self.buttons > 0
    }

    /// Union of both, used when a device has to be reopened for a new profile
    pub fn merged(&self, other: &DeviceRequirements) -> Self {
        Self {
            axes: self.axes.max(other.axes),
            buttons: self.buttons.max(other.buttons),
            keyboard: self.keyboard || other.keyboard,
            mouse: self.mouse || other.mouse,
        }
    }
}

impl fmt::Display for DeviceRequirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} axes, {} buttons, keyboard: {}, mouse: {}",
            self.axes, self.buttons, self.keyboard, self.mouse
        )
    }
}

/// One set of opened virtual devices
///
/// Setters may buffer; `flush` ends the frame and makes everything since the
/// previous flush visible to the system at once.
pub trait VirtualDevice {
    fn capabilities(&self) -> DeviceRequirements;

    /// `value` is normalized to `[-1, 1]`
    fn set_axis(&mut self, axis: VirtualAxis, value: f32) -> Result<(), OutputError>;
    fn set_button(&mut self, button: u8, pressed: bool) -> Result<(), OutputError>;
    fn set_key(&mut self, key: Key, pressed: bool) -> Result<(), OutputError>;
    fn set_mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<(), OutputError>;
    fn move_cursor(&mut self, dx: i32, dy: i32) -> Result<(), OutputError>;
    fn scroll(&mut self, clicks: i32) -> Result<(), OutputError>;
    fn flush(&mut self) -> Result<(), OutputError>;

    /// Releases everything the device may still hold, independent of any diff
    fn release_all(&mut self) -> Result<(), OutputError>;
}

/// Opens virtual devices; moved onto the engine thread at start
pub trait VirtualDeviceProvider: Send {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// [`OutputError::Unavailable`] if the requirements cannot be met
    fn open(
        &mut self,
        requirements: &DeviceRequirements,
    ) -> Result<Box<dyn VirtualDevice>, OutputError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{Action, Activation, Binding, Component, KeyStroke, Mode, PointerAxis};

    #[test]
    fn requirements_follow_profile_outputs() {
        let profile = Profile::new(
            "Mixed",
            vec![Mode::new(
                "default",
                vec![
                    Binding::new(
                        Component::Axis(0),
                        Action::AxisToAxis {
                            target: VirtualAxis::Rz,
                            curve: Default::default(),
                        },
                    ),
                    Binding::new(
                        Component::Button(0),
                        Action::ButtonToButton {
                            button: 11,
                            activation: Activation::WhilePressed,
                        },
                    ),
                    Binding::new(
                        Component::Button(1),
                        Action::ButtonToKey {
                            key: KeyStroke::key(Key::Enter),
                            activation: Activation::WhilePressed,
                        },
                    ),
                    Binding::new(
                        Component::Axis(1),
                        Action::CursorAxis {
                            axis: PointerAxis::Y,
                            deadzone: 0.1,
                            exponent: 1.0,
                            max_speed: 800.0,
                            invert: false,
                        },
                    ),
                ],
            )],
        );
        let requirements = DeviceRequirements::for_profile(&profile);
        assert_eq!(
            requirements,
            DeviceRequirements {
                axes: 6,
                buttons: 12,
                keyboard: true,
                mouse: true,
            }
        );
        assert!(requirements.needs_gamepad());
    }

    #[test]
    fn coverage_checks_every_capability() {
        let small = DeviceRequirements {
            axes: 2,
            buttons: 4,
            keyboard: false,
            mouse: false,
        };
        let keyboard = DeviceRequirements {
            keyboard: true,
            ..Default::default()
        };
        assert!(small.covered_by(&small));
        assert!(!keyboard.covered_by(&small));
        assert!(keyboard.covered_by(&small.merged(&keyboard)));
        assert!(DeviceRequirements::default().covered_by(&DeviceRequirements::default()));
    }
}
