//! Diffing output sink
//!
//! The sink remembers the last state it successfully applied and only sends
//! transitions. Modifier keys go down before and come up after the keys they
//! modify, so a `Ctrl+C` never reaches the system as a bare `C`.
//!
//! Lock requests are turned into a one-frame tap of the lock key, sent only
//! when the request differs from the lock state the sink last produced. Every
//! lock is assumed off until the sink has switched it.

use std::borrow::Cow;
use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::error::OutputError;
use super::virtual_device::{DeviceRequirements, VirtualDevice};
use crate::mapping::{Key, LockKey, OutputState, VirtualAxis};

pub struct OutputSink {
    device: Box<dyn VirtualDevice>,
    applied: OutputState,
    locks: BTreeMap<LockKey, bool>,
}

impl OutputSink {
    pub fn new(device: Box<dyn VirtualDevice>) -> Self {
        Self {
            device,
            applied: OutputState::neutral(),
            locks: BTreeMap::new(),
        }
    }

    pub fn capabilities(&self) -> DeviceRequirements {
        self.device.capabilities()
    }

    /// Last state that reached the device completely
    pub fn applied(&self) -> &OutputState {
        &self.applied
    }

    /// Sends the difference between the applied state and `next`
    ///
    /// On error the applied state is left untouched, so the next call resends
    /// every transition that may have been lost.
    pub fn apply(&mut self, next: &OutputState) -> Result<(), OutputError> {
        let taps: Vec<(LockKey, bool)> = next
            .locks
            .iter()
            .filter(|(lock, on)| self.locks.get(lock).copied().unwrap_or(false) != **on)
            .map(|(lock, on)| (*lock, *on))
            .collect();
        let next = if taps.is_empty() {
            Cow::Borrowed(next)
        } else {
            let mut tapped = next.clone();
            tapped.keys.extend(taps.iter().map(|(lock, _)| lock.key()));
            Cow::Owned(tapped)
        };

        let previous = &self.applied;
        let device = self.device.as_mut();

        for axis in VirtualAxis::ALL {
            let value = next.axis(axis);
            if value != previous.axis(axis) {
                device.set_axis(axis, value)?;
            }
        }

        for button in previous.buttons.difference(&next.buttons) {
            device.set_button(*button, false)?;
        }
        for button in next.buttons.difference(&previous.buttons) {
            device.set_button(*button, true)?;
        }

        let (released_modifiers, released): (Vec<Key>, Vec<Key>) = previous
            .keys
            .difference(&next.keys)
            .partition(|key| key.is_modifier());
        for key in released.into_iter().chain(released_modifiers) {
            device.set_key(key, false)?;
        }
        let (pressed_modifiers, pressed): (Vec<Key>, Vec<Key>) = next
            .keys
            .difference(&previous.keys)
            .partition(|key| key.is_modifier());
        for key in pressed_modifiers.into_iter().chain(pressed) {
            device.set_key(key, true)?;
        }

        for button in previous.mouse_buttons.difference(&next.mouse_buttons) {
            device.set_mouse_button(*button, false)?;
        }
        for button in next.mouse_buttons.difference(&previous.mouse_buttons) {
            device.set_mouse_button(*button, true)?;
        }

        if next.cursor != (0, 0) {
            device.move_cursor(next.cursor.0, next.cursor.1)?;
        }
        if next.scroll != 0 {
            device.scroll(next.scroll)?;
        }

        device.flush()?;

        for (lock, on) in taps {
            debug!("{:?} switched {}", lock, if on { "on" } else { "off" });
            self.locks.insert(lock, on);
        }
        self.applied = OutputState {
            cursor: (0, 0),
            scroll: 0,
            locks: BTreeMap::new(),
            ..next.into_owned()
        };
        Ok(())
    }

    /// Drives the device to a neutral state and asks it to drop anything held
    pub fn release(&mut self) -> Result<(), OutputError> {
        let neutral = self.apply(&OutputState::neutral());
        let released = self.device.release_all();
        debug!("Output released");
        neutral.and(released)
    }

    /// Swaps in a newly opened device; the old one is released first
    pub fn replace_device(&mut self, device: Box<dyn VirtualDevice>) {
        if let Err(e) = self.release() {
            warn!("Failed to release previous virtual device: {}", e);
        }
        self.device = device;
        self.applied = OutputState::neutral();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MouseButton;
    use crate::output::recording::{OutputCall, RecordingProvider};
    use crate::output::virtual_device::VirtualDeviceProvider;

    fn sink() -> (OutputSink, crate::output::recording::Recorder) {
        let mut provider = RecordingProvider::new();
        let recorder = provider.recorder();
        let device = provider
            .open(&DeviceRequirements {
                axes: 8,
                buttons: 16,
                keyboard: true,
                mouse: true,
            })
            .unwrap();
        recorder.clear();
        (OutputSink::new(device), recorder)
    }

    fn with_keys(keys: &[Key]) -> OutputState {
        OutputState {
            keys: keys.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn unchanged_state_only_flushes() {
        let (mut sink, recorder) = sink();
        let mut state = OutputState::neutral();
        state.buttons.insert(3);
        sink.apply(&state).unwrap();
        recorder.clear();
        sink.apply(&state).unwrap();
        assert_eq!(recorder.calls(), vec![OutputCall::Flush]);
    }

    #[test]
    fn modifiers_wrap_the_keys_they_modify() {
        let (mut sink, recorder) = sink();
        sink.apply(&with_keys(&[Key::LeftCtrl, Key::C])).unwrap();
        sink.apply(&with_keys(&[])).unwrap();
        assert_eq!(
            recorder.calls(),
            vec![
                OutputCall::Key(Key::LeftCtrl, true),
                OutputCall::Key(Key::C, true),
                OutputCall::Flush,
                OutputCall::Key(Key::C, false),
                OutputCall::Key(Key::LeftCtrl, false),
                OutputCall::Flush,
            ]
        );
    }

    #[test]
    fn relative_motion_is_sent_every_tick() {
        let (mut sink, recorder) = sink();
        let state = OutputState {
            cursor: (4, -2),
            scroll: 1,
            ..Default::default()
        };
        sink.apply(&state).unwrap();
        sink.apply(&state).unwrap();
        let moves = recorder
            .calls()
            .into_iter()
            .filter(|call| matches!(call, OutputCall::Cursor(4, -2)))
            .count();
        assert_eq!(moves, 2);
        assert_eq!(sink.applied().cursor, (0, 0));
    }

    #[test]
    fn release_returns_to_neutral() {
        let (mut sink, recorder) = sink();
        let mut state = with_keys(&[Key::W]);
        state.axes.insert(VirtualAxis::X, 0.75);
        state.mouse_buttons.insert(MouseButton::Left);
        sink.apply(&state).unwrap();

        sink.release().unwrap();
        assert!(sink.applied().is_neutral());
        assert!(recorder.state().is_neutral());
        assert_eq!(recorder.calls().last(), Some(&OutputCall::ReleaseAll));
    }

    #[test]
    fn lock_request_taps_only_on_change() {
        let (mut sink, recorder) = sink();
        let mut caps_on = OutputState::neutral();
        caps_on.locks.insert(LockKey::CapsLock, true);

        sink.apply(&caps_on).unwrap();
        sink.apply(&OutputState::neutral()).unwrap();
        sink.apply(&caps_on).unwrap();
        let mut caps_off = OutputState::neutral();
        caps_off.locks.insert(LockKey::CapsLock, false);
        sink.apply(&caps_off).unwrap();
        sink.apply(&OutputState::neutral()).unwrap();

        let caps: Vec<bool> = recorder
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                OutputCall::Key(Key::CapsLock, down) => Some(down),
                _ => None,
            })
            .collect();
        assert_eq!(caps, vec![true, false, true, false]);
        assert!(recorder.state().keys.is_empty());
    }

    #[test]
    fn failed_apply_is_retried_in_full() {
        let (mut sink, recorder) = sink();
        recorder.fail_writes(true);
        assert!(sink.apply(&with_keys(&[Key::A])).is_err());
        recorder.fail_writes(false);
        sink.apply(&with_keys(&[Key::A])).unwrap();
        assert!(recorder.state().keys.contains(&Key::A));
    }
}
