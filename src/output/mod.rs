//! Output subsystem: virtual devices and the sink that drives them
//!
//! 1. [`virtual_device`] - the [`VirtualDevice`] / [`VirtualDeviceProvider`] seam
//! 2. [`sink`] - diffs each tick's [`OutputState`](crate::mapping::OutputState) against the last one
//! 3. [`recording`] - in-memory devices for tests and dry runs
//! 4. `uinput` / `dbus` - Linux backends (kernel uinput, InputPlumber over D-Bus)

#[cfg(target_os = "linux")]
pub mod dbus;
pub mod error;
pub mod recording;
pub mod sink;
#[cfg(target_os = "linux")]
pub mod uinput;
pub mod virtual_device;

#[cfg(target_os = "linux")]
pub use dbus::{InputPlumberProvider, ScreenSaverInhibitor};
pub use error::OutputError;
pub use recording::{OutputCall, Recorder, RecordingProvider};
pub use sink::OutputSink;
#[cfg(target_os = "linux")]
pub use uinput::UinputProvider;
pub use virtual_device::{DeviceRequirements, VirtualDevice, VirtualDeviceProvider};
