//! In-memory virtual devices
//!
//! Every call is appended to a log that a [`Recorder`] handle can inspect from
//! any thread. Used by the integration tests and by `--dry-run`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use super::error::OutputError;
use super::virtual_device::{DeviceRequirements, VirtualDevice, VirtualDeviceProvider};
use crate::mapping::{Key, MouseButton, OutputState, VirtualAxis};

#[derive(Debug, Clone, PartialEq)]
pub enum OutputCall {
    Open(DeviceRequirements),
    Axis(VirtualAxis, f32),
    Button(u8, bool),
    Key(Key, bool),
    MouseButton(MouseButton, bool),
    Cursor(i32, i32),
    Scroll(i32),
    Flush,
    ReleaseAll,
}

#[derive(Debug, Default)]
struct Log {
    calls: Vec<OutputCall>,
    held: OutputState,
    cursor_travel: (i64, i64),
    scroll_travel: i64,
    failing_opens: u32,
    failing_writes: bool,
    opens: u32,
    frames: u64,
}

/// Inspection handle for devices opened by a [`RecordingProvider`]
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Log>>,
}

impl Recorder {
    fn lock(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<OutputCall> {
        self.lock().calls.clone()
    }

    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    /// What the devices currently hold; relative motion is not included
    pub fn state(&self) -> OutputState {
        self.lock().held.clone()
    }

    pub fn cursor_travel(&self) -> (i64, i64) {
        self.lock().cursor_travel
    }

    pub fn scroll_travel(&self) -> i64 {
        self.lock().scroll_travel
    }

    /// Completed frames (flushes) since creation
    pub fn frames(&self) -> u64 {
        self.lock().frames
    }

    pub fn opens(&self) -> u32 {
        self.lock().opens
    }

    /// The next `count` opens fail with [`OutputError::Unavailable`]
    pub fn fail_opens(&self, count: u32) {
        self.lock().failing_opens = count;
    }

    /// While set, every device call fails with an I/O error
    pub fn fail_writes(&self, failing: bool) {
        self.lock().failing_writes = failing;
    }
}

#[derive(Debug, Default)]
pub struct RecordingProvider {
    recorder: Recorder,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }
}

impl VirtualDeviceProvider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    fn open(
        &mut self,
        requirements: &DeviceRequirements,
    ) -> Result<Box<dyn VirtualDevice>, OutputError> {
        let mut log = self.recorder.lock();
        if log.failing_opens > 0 {
            log.failing_opens -= 1;
            return Err(OutputError::Unavailable(
                "recording provider told to fail".into(),
            ));
        }
        log.opens += 1;
        log.calls.push(OutputCall::Open(*requirements));
        debug!("Recording device opened with {}", requirements);

        Ok(Box::new(RecordingDevice {
            capabilities: *requirements,
            recorder: self.recorder.clone(),
        }))
    }
}

struct RecordingDevice {
    capabilities: DeviceRequirements,
    recorder: Recorder,
}

impl RecordingDevice {
    fn record(
        &self,
        call: OutputCall,
        update: impl FnOnce(&mut Log),
    ) -> Result<(), OutputError> {
        let mut log = self.recorder.lock();
        if log.failing_writes {
            return Err(OutputError::Io(std::io::Error::other(
                "recording device told to fail",
            )));
        }
        trace!("{:?}", call);
        log.calls.push(call);
        update(&mut *log);
        Ok(())
    }
}

fn set_flag<T: Ord>(set: &mut std::collections::BTreeSet<T>, value: T, on: bool) {
    if on {
        set.insert(value);
    } else {
        set.remove(&value);
    }
}

impl VirtualDevice for RecordingDevice {
    fn capabilities(&self) -> DeviceRequirements {
        self.capabilities
    }

    fn set_axis(&mut self, axis: VirtualAxis, value: f32) -> Result<(), OutputError> {
        self.record(OutputCall::Axis(axis, value), |log| {
            if value == 0.0 {
                log.held.axes.remove(&axis);
            } else {
                log.held.axes.insert(axis, value);
            }
        })
    }

    fn set_button(&mut self, button: u8, pressed: bool) -> Result<(), OutputError> {
        self.record(OutputCall::Button(button, pressed), |log| {
            set_flag(&mut log.held.buttons, button, pressed)
        })
    }

    fn set_key(&mut self, key: Key, pressed: bool) -> Result<(), OutputError> {
        self.record(OutputCall::Key(key, pressed), |log| {
            set_flag(&mut log.held.keys, key, pressed)
        })
    }

    fn set_mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<(), OutputError> {
        self.record(OutputCall::MouseButton(button, pressed), |log| {
            set_flag(&mut log.held.mouse_buttons, button, pressed)
        })
    }

    fn move_cursor(&mut self, dx: i32, dy: i32) -> Result<(), OutputError> {
        self.record(OutputCall::Cursor(dx, dy), |log| {
            log.cursor_travel.0 += i64::from(dx);
            log.cursor_travel.1 += i64::from(dy);
        })
    }

    fn scroll(&mut self, clicks: i32) -> Result<(), OutputError> {
        self.record(OutputCall::Scroll(clicks), |log| {
            log.scroll_travel += i64::from(clicks)
        })
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        self.record(OutputCall::Flush, |log| log.frames += 1)
    }

    fn release_all(&mut self) -> Result<(), OutputError> {
        self.record(OutputCall::ReleaseAll, |log| log.held = OutputState::neutral())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_opens_are_counted_down() {
        let mut provider = RecordingProvider::new();
        let recorder = provider.recorder();
        recorder.fail_opens(1);
        let requirements = DeviceRequirements::default();
        assert!(matches!(
            provider.open(&requirements),
            Err(OutputError::Unavailable(_))
        ));
        assert!(provider.open(&requirements).is_ok());
        assert_eq!(recorder.opens(), 1);
    }

    #[test]
    fn held_state_mirrors_calls() {
        let mut provider = RecordingProvider::new();
        let recorder = provider.recorder();
        let mut device = provider.open(&DeviceRequirements::default()).unwrap();
        device.set_key(Key::Q, true).unwrap();
        device.set_axis(VirtualAxis::Y, -0.5).unwrap();
        device.move_cursor(3, 4).unwrap();
        device.flush().unwrap();

        let state = recorder.state();
        assert!(state.keys.contains(&Key::Q));
        assert_eq!(state.axis(VirtualAxis::Y), -0.5);
        assert_eq!(recorder.cursor_travel(), (3, 4));
        assert_eq!(recorder.frames(), 1);

        device.release_all().unwrap();
        assert!(recorder.state().is_neutral());
    }
}
