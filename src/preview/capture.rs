use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::camera::backend::FrameCallback;
use crate::camera::error::{CameraError, Result};
use crate::camera::types::{PixelFormat, RawFrame};
use crate::diagnostics::stats::{DiagnosticSnapshot, DiagnosticStats};

/// Generation value meaning "no session open".
const CLOSED: u64 = 0;

/// A single captured frame, owned by the preview pipeline.
#[derive(Debug)]
pub struct Frame {
    /// Raw pixel data in `format`.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    pub format: PixelFormat,
    /// Capture timestamp in microseconds.
    pub timestamp_us: u64,
    /// Session generation that produced this frame.
    pub generation: u64,
}

impl Frame {
    /// Copy a borrowed device frame into an owned one.
    ///
    /// Fails when the buffer length does not match the declared geometry.
    pub fn copy_from(raw: &RawFrame<'_>, generation: u64) -> Result<Self> {
        match raw.format.expected_len(raw.width, raw.height) {
            Some(expected) if expected != raw.data.len() => {
                return Err(CameraError::FrameProcessing(format!(
                    "{}x{} {:?} needs {expected} bytes, got {}",
                    raw.width,
                    raw.height,
                    raw.format,
                    raw.data.len()
                )));
            }
            None if raw.data.is_empty() => {
                return Err(CameraError::FrameProcessing(format!(
                    "empty {:?} frame",
                    raw.format
                )));
            }
            _ => {}
        }

        Ok(Self {
            data: raw.data.to_vec(),
            width: raw.width,
            height: raw.height,
            format: raw.format,
            timestamp_us: raw.timestamp_us,
            generation,
        })
    }
}

/// Receives delivery notifications from a `FrameChannel`.
///
/// Called on the producer thread (or whichever thread closes the channel).
/// Implementations must hand off and return; they must not render inline.
pub trait FrameSink: Send + Sync {
    /// A new frame of `generation` is waiting in the slot.
    fn frame_ready(&self, generation: u64);

    /// The channel closed; the surface should drop its current image.
    fn cleared(&self);
}

struct Slot {
    /// Generation accepted by the slot, `None` while closed.
    generation: Option<u64>,
    frame: Option<Arc<Frame>>,
    /// Whether `frame` has not been taken by the consumer yet.
    fresh: bool,
}

/// Latest-frame-wins mailbox between a capture device and a display surface.
///
/// Holds at most one frame. A new frame replaces the previous one whether or
/// not it was consumed, so a slow consumer never causes memory growth or
/// back-pressure on the producer.
pub struct FrameChannel {
    slot: Mutex<Slot>,
    /// Mirror of `slot.generation` readable without the lock.
    open_generation: AtomicU64,
    /// Monotonic counter incremented on each accepted frame.
    sequence: AtomicU64,
    /// Set while a `frame_ready` notification is outstanding.
    notify_pending: AtomicBool,
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
    stats: Mutex<DiagnosticStats>,
}

impl FrameChannel {
    /// Create a closed channel.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                generation: None,
                frame: None,
                fresh: false,
            }),
            open_generation: AtomicU64::new(CLOSED),
            sequence: AtomicU64::new(0),
            notify_pending: AtomicBool::new(false),
            sink: RwLock::new(None),
            stats: Mutex::new(DiagnosticStats::new()),
        }
    }

    /// Register the consumer to notify when frames arrive.
    pub fn set_sink(&self, sink: Option<Arc<dyn FrameSink>>) {
        *self.sink.write() = sink;
    }

    /// Start accepting frames of `generation`. Any previous frame is released.
    pub fn open(&self, generation: u64) {
        let previous = {
            let mut slot = self.slot.lock();
            slot.generation = Some(generation);
            slot.fresh = false;
            self.open_generation.store(generation, Ordering::Release);
            slot.frame.take()
        };
        self.notify_pending.store(false, Ordering::Release);
        self.stats.lock().reset();
        drop(previous);
        debug!("frame channel open for generation {generation}");
    }

    /// Stop accepting frames and clear the slot.
    ///
    /// Once this returns, no `on_frame` call can place a frame in the slot and
    /// `take_latest` yields nothing until the next `open`.
    pub fn close(&self) {
        self.open_generation.store(CLOSED, Ordering::Release);
        let (was_open, previous) = {
            let mut slot = self.slot.lock();
            let was_open = slot.generation.take().is_some();
            slot.fresh = false;
            (was_open, slot.frame.take())
        };
        self.notify_pending.store(false, Ordering::Release);
        drop(previous);

        if was_open {
            if let Some(sink) = self.sink() {
                sink.cleared();
            }
        }
    }

    /// Whether frames of some generation are currently accepted.
    pub fn is_open(&self) -> bool {
        self.open_generation.load(Ordering::Acquire) != CLOSED
    }

    /// Producer entry point: copy `raw` into the slot if `generation` is open.
    ///
    /// Never blocks beyond the short slot lock and never fails; bad frames are
    /// logged and dropped.
    pub fn on_frame(&self, generation: u64, raw: &RawFrame<'_>) {
        if self.open_generation.load(Ordering::Acquire) != generation {
            self.stats.lock().record_rejected();
            return;
        }

        let frame = match Frame::copy_from(raw, generation) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!("dropping frame for generation {generation}: {e}");
                self.stats.lock().record_failure();
                return;
            }
        };
        let bytes = frame.data.len();

        let replaced = {
            let mut slot = self.slot.lock();
            if slot.generation != Some(generation) {
                // Raced with close() after the fast check.
                drop(slot);
                self.stats.lock().record_rejected();
                return;
            }
            let superseded = slot.fresh;
            let old = slot.frame.replace(frame);
            slot.fresh = true;
            self.sequence.fetch_add(1, Ordering::Relaxed);
            (old, superseded)
        };

        {
            let mut stats = self.stats.lock();
            stats.record_frame(bytes);
            if replaced.1 {
                stats.record_superseded();
            }
        }
        // Release the previous frame outside the slot lock.
        drop(replaced);

        if !self.notify_pending.swap(true, Ordering::AcqRel) {
            if let Some(sink) = self.sink() {
                sink.frame_ready(generation);
            }
        }
    }

    /// Build the device callback that feeds this channel for `generation`.
    pub fn callback_for(self: &Arc<Self>, generation: u64) -> FrameCallback {
        let channel = Arc::clone(self);
        Arc::new(move |raw: &RawFrame<'_>| channel.on_frame(generation, raw))
    }

    /// Consumer entry point: take the newest frame not yet consumed.
    ///
    /// Returns `None` if the channel closed, or the frame was already taken.
    pub fn take_latest(&self) -> Option<Arc<Frame>> {
        self.notify_pending.store(false, Ordering::Release);
        let mut slot = self.slot.lock();
        let generation = slot.generation?;
        if !slot.fresh {
            return None;
        }
        let frame = slot.frame.clone()?;
        if frame.generation != generation {
            return None;
        }
        slot.fresh = false;
        drop(slot);
        self.stats.lock().record_delivery();
        Some(frame)
    }

    /// Peek at the frame currently in the slot, consumed or not.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.lock().frame.clone()
    }

    /// Return the monotonic sequence number of accepted frames.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Take a snapshot of delivery stats since the last `open`.
    pub fn diagnostics(&self) -> DiagnosticSnapshot {
        self.stats.lock().snapshot()
    }

    fn sink(&self) -> Option<Arc<dyn FrameSink>> {
        self.sink.read().clone()
    }
}

impl Default for FrameChannel {
    fn default() -> Self {
        Self::new()
    }
}
