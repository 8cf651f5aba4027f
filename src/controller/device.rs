use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime handle of a device inside its backend
///
/// Only valid while the backend keeps the device around; profiles never refer
/// to it, they use [`DeviceKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identity of a physical device
///
/// `instance` is the ordinal among connected devices sharing the same
/// vendor/product pair, so two identical pads keep distinct keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub vendor: u16,
    pub product: u16,
    #[serde(default)]
    pub instance: u8,
}

impl DeviceKey {
    pub fn new(vendor: u16, product: u16, instance: u8) -> Self {
        Self {
            vendor,
            product,
            instance,
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}/{}", self.vendor, self.product, self.instance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub axes: u8,
    pub buttons: u8,
    pub hats: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// A physical input device as seen by the rest of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub key: DeviceKey,
    pub name: String,
    pub capabilities: Capabilities,
    pub state: ConnectionState,
}

impl Device {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.key)
    }
}
