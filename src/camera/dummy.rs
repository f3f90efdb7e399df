use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::camera::backend::{CameraBackend, DeviceSession, FrameCallback};
use crate::camera::error::{CameraError, Result};
use crate::camera::types::{CameraDevice, DeviceId, PixelFormat, RawFrame};

const DUMMY_DEVICE_ID_PREFIX: &str = "dummy:test:camera";
const DUMMY_DEVICE_NAME: &str = "Dummy Test Camera";

/// How the simulated device reacts to `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Starts streaming after `open_delay`.
    Succeed,
    /// Fails after `open_delay`.
    Fail,
    /// Blocks for the given duration, then starts anyway.
    Hang(Duration),
}

/// How the simulated device reacts to a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehavior {
    /// Stops the producer thread and confirms.
    Graceful,
    /// Ignores the stop signal; only dropping the session stops it.
    Unresponsive,
    /// Blocks inside `begin_stop` for the given duration, then stops.
    Hang(Duration),
    /// `begin_stop` returns an error; dropping the session stops it.
    Fail,
}

/// Knobs for the simulated camera.
#[derive(Debug, Clone)]
pub struct DummyConfig {
    pub device_count: usize,
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub open_delay: Duration,
    pub open: OpenBehavior,
    pub stop: StopBehavior,
    pub fail_enumeration: bool,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            width: 640,
            height: 480,
            fps: 30.0,
            open_delay: Duration::from_millis(50),
            open: OpenBehavior::Succeed,
            stop: StopBehavior::Graceful,
            fail_enumeration: false,
        }
    }
}

/// Counters shared between a `DummyBackend` and every session it opened.
#[derive(Debug, Default)]
pub struct DummyProbe {
    open_sessions: AtomicUsize,
    max_concurrent: AtomicUsize,
    opens: AtomicUsize,
}

impl DummyProbe {
    /// Sessions whose producer thread is still alive.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Highest number of sessions ever alive at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Number of successful `open` calls.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn session_opened(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
    }

    fn session_closed(&self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A fake camera backend for running without real hardware.
///
/// Streams an RGB24 gradient test pattern from a producer thread per session.
/// Open and stop can be scripted to fail or hang, which is how the capture
/// lifecycle's timeout paths are exercised.
///
/// Enable via `DUMMY_CAMERA=1` environment variable.
pub struct DummyBackend {
    config: DummyConfig,
    probe: Arc<DummyProbe>,
}

impl DummyBackend {
    /// Create a backend with one well-behaved device.
    pub fn new() -> Self {
        Self::with_config(DummyConfig::default())
    }

    pub fn with_config(config: DummyConfig) -> Self {
        Self {
            config,
            probe: Arc::new(DummyProbe::default()),
        }
    }

    /// The stable device ID for the `index`-th dummy camera.
    pub fn device_id(index: usize) -> DeviceId {
        DeviceId::new(format!("{DUMMY_DEVICE_ID_PREFIX}-{:03}", index + 1))
    }

    pub fn probe(&self) -> Arc<DummyProbe> {
        Arc::clone(&self.probe)
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for DummyBackend {
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>> {
        if self.config.fail_enumeration {
            return Err(CameraError::Enumeration(
                "simulated enumeration failure".to_string(),
            ));
        }
        Ok((0..self.config.device_count)
            .map(|index| CameraDevice {
                id: Self::device_id(index),
                name: format!("{DUMMY_DEVICE_NAME} {}", index + 1),
                device_path: format!("dummy://test-camera/{index}"),
            })
            .collect())
    }

    fn open(&self, device: &CameraDevice) -> Result<Box<dyn DeviceSession>> {
        let known = (0..self.config.device_count).any(|i| Self::device_id(i) == device.id);
        if !known {
            return Err(CameraError::DeviceNotFound(device.id.to_string()));
        }

        std::thread::sleep(self.config.open_delay);
        match self.config.open {
            OpenBehavior::Succeed => {}
            OpenBehavior::Fail => {
                return Err(CameraError::Start(format!(
                    "simulated open failure for {}",
                    device.id
                )))
            }
            OpenBehavior::Hang(duration) => std::thread::sleep(duration),
        }

        let session = DummySession::spawn(device, &self.config, Arc::clone(&self.probe))?;
        Ok(Box::new(session))
    }
}

struct SessionShared {
    callback: Mutex<Option<FrameCallback>>,
    stop_requested: AtomicBool,
    stopped: Mutex<bool>,
    stopped_cv: Condvar,
}

/// One simulated capture stream.
struct DummySession {
    shared: Arc<SessionShared>,
    stop_behavior: StopBehavior,
    thread: Option<JoinHandle<()>>,
}

impl DummySession {
    fn spawn(device: &CameraDevice, config: &DummyConfig, probe: Arc<DummyProbe>) -> Result<Self> {
        let shared = Arc::new(SessionShared {
            callback: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            stopped: Mutex::new(false),
            stopped_cv: Condvar::new(),
        });

        let interval = Duration::from_secs_f32(1.0 / config.fps.max(1.0));
        let (width, height) = (config.width, config.height);
        let shared_clone = Arc::clone(&shared);

        probe.session_opened();
        let probe_clone = Arc::clone(&probe);
        let thread = std::thread::Builder::new()
            .name(format!("dummy-producer-{}", device.id))
            .spawn(move || {
                produce_frames(&shared_clone, &probe_clone, width, height, interval);
                probe_clone.session_closed();
                *shared_clone.stopped.lock() = true;
                shared_clone.stopped_cv.notify_all();
            })
            .map_err(|e| {
                probe.session_closed();
                CameraError::Thread(e.to_string())
            })?;

        Ok(Self {
            shared,
            stop_behavior: config.stop,
            thread: Some(thread),
        })
    }
}

/// Producer loop: fills a reused buffer and hands it to the callback by
/// reference, like a real driver lending its DMA buffer.
fn produce_frames(
    shared: &SessionShared,
    probe: &DummyProbe,
    width: u32,
    height: u32,
    interval: Duration,
) {
    let started = Instant::now();
    let mut buffer = vec![0u8; PixelFormat::Rgb24.expected_len(width, height).unwrap_or(0)];
    let mut index: u64 = 0;

    while !shared.stop_requested.load(Ordering::Acquire) {
        fill_test_pattern(&mut buffer, width, index);
        let raw = RawFrame {
            data: &buffer,
            width,
            height,
            format: PixelFormat::Rgb24,
            timestamp_us: started.elapsed().as_micros() as u64,
        };

        // Held across the call so detaching waits for an in-flight frame.
        let callback = shared.callback.lock();
        if let Some(cb) = callback.as_ref() {
            cb(&raw);
        }
        drop(callback);

        index += 1;
        std::thread::sleep(interval);
    }
}

/// Horizontal gradient; the first byte carries the frame index.
fn fill_test_pattern(buffer: &mut [u8], width: u32, index: u64) {
    let row_bytes = (width as usize * 3).max(1);
    for (i, px) in buffer.chunks_exact_mut(3).enumerate() {
        let x = (i * 3) % row_bytes;
        px[0] = (x * 255 / row_bytes) as u8;
        px[1] = (index % 256) as u8;
        px[2] = 128;
    }
    if let Some(first) = buffer.first_mut() {
        *first = (index % 256) as u8;
    }
}

impl DeviceSession for DummySession {
    fn set_frame_callback(&self, callback: Option<FrameCallback>) {
        *self.shared.callback.lock() = callback;
    }

    fn begin_stop(&self) -> Result<()> {
        match self.stop_behavior {
            StopBehavior::Graceful => {}
            StopBehavior::Unresponsive => return Ok(()),
            StopBehavior::Hang(duration) => std::thread::sleep(duration),
            StopBehavior::Fail => {
                return Err(CameraError::Stop("simulated stop failure".to_string()))
            }
        }
        self.shared.stop_requested.store(true, Ordering::Release);
        Ok(())
    }

    fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.shared.stopped.lock();
        while !*stopped {
            if self
                .shared
                .stopped_cv
                .wait_until(&mut stopped, deadline)
                .timed_out()
            {
                break;
            }
        }
        *stopped
    }
}

impl Drop for DummySession {
    fn drop(&mut self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        *self.shared.callback.lock() = None;
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> DummyConfig {
        DummyConfig {
            width: 4,
            height: 2,
            fps: 200.0,
            open_delay: Duration::ZERO,
            ..DummyConfig::default()
        }
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn dummy_backend_enumerates_configured_devices() {
        let backend = DummyBackend::with_config(DummyConfig {
            device_count: 2,
            ..fast_config()
        });
        let devices = backend.enumerate_devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Dummy Test Camera 1");
        assert_eq!(devices[0].id, DummyBackend::device_id(0));
        assert_eq!(devices[1].id.as_str(), "dummy:test:camera-002");
    }

    #[test]
    fn dummy_backend_enumeration_can_fail() {
        let backend = DummyBackend::with_config(DummyConfig {
            fail_enumeration: true,
            ..fast_config()
        });
        assert!(matches!(
            backend.enumerate_devices(),
            Err(CameraError::Enumeration(_))
        ));
    }

    #[test]
    fn dummy_backend_rejects_unknown_device() {
        let backend = DummyBackend::with_config(fast_config());
        let stranger = CameraDevice {
            id: DeviceId::new("elsewhere"),
            name: "Other".to_string(),
            device_path: String::new(),
        };
        assert!(matches!(
            backend.open(&stranger),
            Err(CameraError::DeviceNotFound(_))
        ));
        assert_eq!(backend.probe().opens(), 0);
    }

    #[test]
    fn session_delivers_frames_to_callback() {
        let backend = DummyBackend::with_config(fast_config());
        let device = backend.enumerate_devices().unwrap().remove(0);
        let session = backend.open(&device).unwrap();

        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        session.set_frame_callback(Some(Arc::new(move |raw: &RawFrame<'_>| {
            assert_eq!(raw.data.len(), 4 * 2 * 3);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        })));

        assert!(wait_until(Duration::from_secs(2), || seen.load(Ordering::SeqCst) >= 3));
        session.begin_stop().unwrap();
        assert!(session.wait_stopped(Duration::from_secs(2)));
        assert_eq!(backend.probe().open_sessions(), 0);
    }

    #[test]
    fn detached_callback_is_never_invoked_again() {
        let backend = DummyBackend::with_config(fast_config());
        let device = backend.enumerate_devices().unwrap().remove(0);
        let session = backend.open(&device).unwrap();

        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        session.set_frame_callback(Some(Arc::new(move |_raw: &RawFrame<'_>| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        })));
        assert!(wait_until(Duration::from_secs(2), || seen.load(Ordering::SeqCst) > 0));

        session.set_frame_callback(None);
        let after_detach = seen.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.load(Ordering::SeqCst), after_detach);
    }

    #[test]
    fn unresponsive_session_does_not_confirm_stop_until_dropped() {
        let backend = DummyBackend::with_config(DummyConfig {
            stop: StopBehavior::Unresponsive,
            ..fast_config()
        });
        let probe = backend.probe();
        let device = backend.enumerate_devices().unwrap().remove(0);
        let session = backend.open(&device).unwrap();

        session.begin_stop().unwrap();
        assert!(!session.wait_stopped(Duration::from_millis(50)));
        assert_eq!(probe.open_sessions(), 1);

        drop(session);
        assert_eq!(probe.open_sessions(), 0);
    }

    #[test]
    fn failing_stop_reports_error() {
        let backend = DummyBackend::with_config(DummyConfig {
            stop: StopBehavior::Fail,
            ..fast_config()
        });
        let device = backend.enumerate_devices().unwrap().remove(0);
        let session = backend.open(&device).unwrap();
        assert!(matches!(session.begin_stop(), Err(CameraError::Stop(_))));
    }

    #[test]
    fn failing_open_reports_start_error() {
        let backend = DummyBackend::with_config(DummyConfig {
            open: OpenBehavior::Fail,
            ..fast_config()
        });
        let device = backend.enumerate_devices().unwrap().remove(0);
        assert!(matches!(backend.open(&device), Err(CameraError::Start(_))));
        assert_eq!(backend.probe().opens(), 0);
    }

    #[test]
    fn test_pattern_encodes_frame_index_in_first_byte() {
        let mut buffer = vec![0u8; 4 * 2 * 3];
        fill_test_pattern(&mut buffer, 4, 7);
        assert_eq!(buffer[0], 7);
        assert_eq!(buffer[1], 7);
        assert_eq!(buffer[2], 128);
    }

    #[test]
    fn dummy_backend_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DummyBackend>();
    }
}
