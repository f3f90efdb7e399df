use std::sync::Arc;
use std::time::Duration;

use crate::camera::error::Result;
use crate::camera::types::{CameraDevice, RawFrame};

/// Per-frame callback installed on an open device.
///
/// Fires on the device's own producer thread.
pub type FrameCallback = Arc<dyn Fn(&RawFrame<'_>) + Send + Sync>;

/// Platform-agnostic camera backend trait.
///
/// Covers device enumeration and opening a capture stream. Implementations
/// may block inside `open` for as long as the device takes to confirm; the
/// caller is responsible for bounding that wait.
pub trait CameraBackend: Send + Sync {
    /// Enumerate all currently connected camera devices, in a stable order.
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>>;

    /// Open and start streaming from a device.
    fn open(&self, device: &CameraDevice) -> Result<Box<dyn DeviceSession>>;
}

/// A started capture stream on one device.
pub trait DeviceSession: Send {
    /// Install or detach the frame callback. After `None` returns, the
    /// device must not invoke the previous callback again.
    fn set_frame_callback(&self, callback: Option<FrameCallback>);

    /// Signal the device to stop. Must not wait for the stop to complete.
    fn begin_stop(&self) -> Result<()>;

    /// Wait up to `timeout` for the device to confirm it stopped.
    fn wait_stopped(&self, timeout: Duration) -> bool;
}

/// Backend used on hosts without a native camera backend. Sees no devices.
pub struct NullBackend;

impl CameraBackend for NullBackend {
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>> {
        Ok(vec![])
    }

    fn open(&self, device: &CameraDevice) -> Result<Box<dyn DeviceSession>> {
        Err(crate::camera::error::CameraError::DeviceNotFound(
            device.id.to_string(),
        ))
    }
}
