use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use super::device::{Capabilities, DeviceId};
use super::input_state::InputState;

/// Device-level errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Failed to open device {device}: {reason}")]
    Open { device: DeviceId, reason: String },

    #[error("Failed to read device {device}: {reason}")]
    Read { device: DeviceId, reason: String },

    #[error("Timed out polling device {0}")]
    Timeout(DeviceId),

    #[error("Unknown device {0}")]
    Unknown(DeviceId),

    #[error("Input backend error: {0}")]
    Backend(String),
}

/// What a backend knows about a device before the manager assigns it a key
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub vendor: u16,
    pub product: u16,
    pub name: String,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HotplugEvent {
    Connected(DeviceInfo),
    Disconnected(DeviceId),
}

/// Creates the bounded hot-plug queue
pub(crate) fn hotplug_channel(capacity: usize) -> (HotplugSender, HotplugReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let overflowed = Arc::new(AtomicBool::new(false));
    (
        HotplugSender {
            tx,
            overflowed: overflowed.clone(),
        },
        HotplugReceiver { rx, overflowed },
    )
}

/// Sending half of the hot-plug queue. Cloneable and usable from any thread.
///
/// Sending never blocks. An event that does not fit marks the queue as
/// overflowed, and the receiving side falls back to a full rescan.
#[derive(Debug, Clone)]
pub struct HotplugSender {
    tx: mpsc::Sender<HotplugEvent>,
    overflowed: Arc<AtomicBool>,
}

impl HotplugSender {
    /// Returns `false` if the receiving side is gone
    pub fn send(&self, event: HotplugEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Hot-plug queue full, dropping {:?} until the next rescan", event);
                self.overflowed.store(true, Ordering::Release);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

pub(crate) struct HotplugReceiver {
    rx: mpsc::Receiver<HotplugEvent>,
    overflowed: Arc<AtomicBool>,
}

impl HotplugReceiver {
    pub fn try_recv(&mut self) -> Option<HotplugEvent> {
        self.rx.try_recv().ok()
    }

    /// Whether events were dropped since the last call
    pub fn take_overflow(&self) -> bool {
        self.overflowed.swap(false, Ordering::AcqRel)
    }
}

/// Access to physical input devices
///
/// Backends live on the engine thread and are never shared, so they do not
/// need to be `Send`. Hot-plug notifications are forwarded into the queue by
/// [`DeviceBackend::pump`], which the device manager calls once per tick
/// before draining the queue.
pub trait DeviceBackend {
    fn name(&self) -> &str;

    /// Lists the devices currently present
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, DeviceError>;

    fn open(&mut self, id: DeviceId) -> Result<(), DeviceError>;

    fn close(&mut self, id: DeviceId);

    /// Reads the current state of an opened device
    ///
    /// # Errors
    ///
    /// * [`DeviceError::Timeout`] when no state was available within `timeout`
    /// * [`DeviceError::Read`] when the handle is stale
    fn poll(&mut self, id: DeviceId, timeout: Duration) -> Result<InputState, DeviceError>;

    /// Forwards pending OS hot-plug notifications
    fn pump(&mut self, hotplug: &HotplugSender);
}
