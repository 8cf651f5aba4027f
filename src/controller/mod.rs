//! Controller subsystem: physical device access
//!
//! 1. [`backend`] - the [`DeviceBackend`] seam and its error type
//! 2. [`gilrs_backend`] - desktop gamepads through gilrs
//! 3. [`scripted`] - in-memory devices for tests and replays
//! 4. [`device_manager`] - lifecycle, hot-plug queue and polling
//!
//! # Architecture
//!
//! ```text
//! OS / HID ──► DeviceBackend ──► DeviceManager ──► (DeviceKey, InputState) per tick
//!                   │ pump()          ▲
//!                   └─► hot-plug ─────┘
//!                       queue (bounded, rescan on overflow)
//! ```

pub mod backend;
pub mod device;
pub mod device_manager;
pub mod gilrs_backend;
pub mod input_state;
pub mod scripted;

pub use backend::{DeviceBackend, DeviceError, DeviceInfo, HotplugEvent, HotplugSender};
pub use device::{Capabilities, ConnectionState, Device, DeviceId, DeviceKey};
pub use device_manager::{DeviceEvent, DeviceManager, DeviceManagerSettings, PollOutcome};
pub use gilrs_backend::GilrsBackend;
pub use input_state::{HatDirection, HatState, InputState};
pub use scripted::{ScriptedBackend, ScriptedInput};
