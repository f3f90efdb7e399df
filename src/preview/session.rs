use crossbeam_channel::RecvTimeoutError;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::capture::FrameChannel;
use super::status::{StatusEvent, StatusSink};
use crate::camera::backend::{CameraBackend, DeviceSession};
use crate::camera::error::{CameraError, Result};
use crate::camera::types::{CameraDevice, DeviceId};
use crate::diagnostics::stats::DiagnosticSnapshot;

/// Lifecycle state of a capture controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureState {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Which enumerated device a controller opens.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelection {
    /// The first enumerated device.
    #[default]
    First,
    /// A specific device; starting fails if it is not connected.
    ById(DeviceId),
}

impl DeviceSelection {
    pub fn select<'a>(&self, devices: &'a [CameraDevice]) -> Option<&'a CameraDevice> {
        match self {
            Self::First => devices.first(),
            Self::ById(id) => devices.iter().find(|d| &d.id == id),
        }
    }
}

/// Bounds for the start and stop handshakes.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Maximum time to wait for the device to confirm it started.
    pub start_timeout: Duration,
    /// Maximum time to wait for the device to confirm it stopped.
    pub stop_timeout: Duration,
    pub selection: DeviceSelection,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(4),
            selection: DeviceSelection::First,
        }
    }
}

/// The device currently owned by a controller.
struct ActiveSession {
    device: CameraDevice,
    generation: u64,
    handle: Box<dyn DeviceSession>,
}

/// How a bounded stop ended. Every variant leaves the controller idle.
#[derive(Debug)]
enum StopOutcome {
    Confirmed,
    Unconfirmed,
    Failed(CameraError),
    /// The stop worker did not report back within the bound and was left
    /// holding the device.
    Abandoned,
}

/// Held by every open or stop worker while it may still own a device session.
struct WorkerToken(Arc<AtomicUsize>);

impl WorkerToken {
    fn acquire(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(count))
    }
}

impl Drop for WorkerToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

type OpenReply = (Result<Box<dyn DeviceSession>>, WorkerToken);

/// Owns at most one capture session and its timed start/stop protocol.
///
/// `start`, `stop` and `dispose` are serialised by one lifecycle lock held for
/// the whole sequence, including the bounded waits. Frame delivery never
/// takes that lock: the device callback goes straight to the `FrameChannel`,
/// which checks the session generation atomically.
///
/// Status listeners run after the lifecycle lock is released and may call
/// back into the controller.
///
/// A worker abandoned after a timeout keeps its session until the device
/// returns. `start` refuses to open another session while any such worker
/// is alive.
pub struct CaptureController {
    label: String,
    backend: Arc<dyn CameraBackend>,
    config: CaptureConfig,
    lifecycle: Mutex<Option<ActiveSession>>,
    state: Mutex<CaptureState>,
    disposing: AtomicBool,
    generation: AtomicU64,
    /// Open and stop workers that have not yet released their device.
    busy_workers: Arc<AtomicUsize>,
    channel: Arc<FrameChannel>,
    listeners: RwLock<Vec<Arc<dyn StatusSink>>>,
}

impl CaptureController {
    /// Create an idle controller. `label` only appears in logs.
    pub fn new(
        label: impl Into<String>,
        backend: Arc<dyn CameraBackend>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            label: label.into(),
            backend,
            config,
            lifecycle: Mutex::new(None),
            state: Mutex::new(CaptureState::Idle),
            disposing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            busy_workers: Arc::new(AtomicUsize::new(0)),
            channel: Arc::new(FrameChannel::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a status listener.
    pub fn subscribe_status(&self, listener: Arc<dyn StatusSink>) {
        self.listeners.write().push(listener);
    }

    /// Enumerate devices and report what was found, without opening anything.
    pub fn probe_devices(&self) -> usize {
        match self.backend.enumerate_devices() {
            Ok(devices) if devices.is_empty() => {
                self.emit(StatusEvent::no_camera());
                0
            }
            Ok(devices) => {
                self.emit(StatusEvent::devices_found(devices.len()));
                devices.len()
            }
            Err(e) => {
                warn!("[{}] device probe failed: {e}", self.label);
                self.emit(StatusEvent::enumeration_failed(&e));
                0
            }
        }
    }

    /// Open the selected device and wait up to `start_timeout` for it to
    /// confirm. No-op if already starting or running, if disposed, or if no
    /// device is available. Never panics or returns an error; failures become
    /// status events.
    pub fn start(&self) {
        if let Some(event) = self.start_locked() {
            self.emit(event);
        }
    }

    fn start_locked(&self) -> Option<StatusEvent> {
        if self.is_disposing() {
            debug!("[{}] start ignored: disposing", self.label);
            return None;
        }
        if matches!(self.state(), CaptureState::Starting | CaptureState::Running) {
            return None;
        }

        let mut lifecycle = self.lifecycle.lock();
        if self.is_disposing() || lifecycle.is_some() {
            return None;
        }

        let pending = self.busy_workers.load(Ordering::SeqCst);
        if pending > 0 {
            let e = CameraError::Start(format!(
                "previous device session still being released ({pending} pending)"
            ));
            self.fail_start(&e);
            return Some(StatusEvent::start_failed(&e));
        }

        let device = match self.select_device() {
            Ok(device) => device,
            Err(CameraError::NoDevice) => {
                info!("[{}] no camera found", self.label);
                return Some(StatusEvent::no_camera());
            }
            Err(e @ CameraError::Enumeration(_)) => {
                self.fail_start(&e);
                return Some(StatusEvent::enumeration_failed(&e));
            }
            Err(e) => {
                self.fail_start(&e);
                return Some(StatusEvent::start_failed(&e));
            }
        };

        self.set_state(CaptureState::Starting);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.channel.open(generation);
        info!(
            "[{}] starting {} (generation {generation})",
            self.label, device.id
        );

        match self.open_with_timeout(&device, generation) {
            Ok(handle) => {
                handle.set_frame_callback(Some(self.channel.callback_for(generation)));
                let name = device.name.clone();
                *lifecycle = Some(ActiveSession {
                    device,
                    generation,
                    handle,
                });
                self.set_state(CaptureState::Running);
                info!("[{}] running (generation {generation})", self.label);
                Some(StatusEvent::running(&name))
            }
            Err(e) => {
                self.channel.close();
                self.fail_start(&e);
                Some(StatusEvent::start_failed(&e))
            }
        }
    }

    /// Detach the frame callback, then ask the device to stop and wait up to
    /// `stop_timeout`. The controller is idle afterwards whether or not the
    /// device confirmed. No-op if idle.
    pub fn stop(&self) {
        if let Some(event) = self.stop_locked() {
            self.emit(event);
        }
    }

    fn stop_locked(&self) -> Option<StatusEvent> {
        let mut lifecycle = self.lifecycle.lock();
        let active = lifecycle.take()?;

        self.set_state(CaptureState::Stopping);
        active.handle.set_frame_callback(None);
        self.channel.close();

        let device_id = active.device.id.clone();
        let generation = active.generation;
        match self.stop_with_timeout(active) {
            StopOutcome::Confirmed => {
                info!("[{}] stopped {device_id} (generation {generation})", self.label);
            }
            StopOutcome::Unconfirmed => {
                warn!(
                    "[{}] {device_id} did not confirm stop within {} ms; releasing anyway",
                    self.label,
                    self.config.stop_timeout.as_millis()
                );
            }
            StopOutcome::Failed(e) => {
                warn!("[{}] error stopping {device_id}: {e}", self.label);
            }
            StopOutcome::Abandoned => {
                // The worker still owns the device and drops it whenever the
                // driver returns.
                warn!(
                    "[{}] {}; abandoning session {generation}",
                    self.label,
                    CameraError::StopTimeout(self.config.stop_timeout.as_millis())
                );
            }
        }

        self.set_state(CaptureState::Idle);
        Some(StatusEvent::stopped())
    }

    /// Permanently shut the controller down. `start` is a no-op afterwards and
    /// no further status events are emitted.
    pub fn dispose(&self) {
        if !self.disposing.swap(true, Ordering::SeqCst) {
            debug!("[{}] disposing", self.label);
        }
        self.stop();
        self.channel.set_sink(None);
    }

    pub fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    pub fn is_disposing(&self) -> bool {
        self.disposing.load(Ordering::SeqCst)
    }

    /// Generation of the most recent start attempt.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The device of the running session, if any. Waits for an in-progress
    /// start or stop to finish.
    pub fn current_device(&self) -> Option<CameraDevice> {
        self.lifecycle.lock().as_ref().map(|a| a.device.clone())
    }

    /// The frame channel the display surface consumes from.
    pub fn channel(&self) -> &Arc<FrameChannel> {
        &self.channel
    }

    /// Delivery stats for the current or last session.
    pub fn diagnostics(&self) -> DiagnosticSnapshot {
        self.channel.diagnostics()
    }

    fn select_device(&self) -> Result<CameraDevice> {
        let devices = self.backend.enumerate_devices()?;
        if devices.is_empty() {
            return Err(CameraError::NoDevice);
        }
        self.config
            .selection
            .select(&devices)
            .cloned()
            .ok_or_else(|| match &self.config.selection {
                DeviceSelection::ById(id) => CameraError::DeviceNotFound(id.to_string()),
                DeviceSelection::First => CameraError::NoDevice,
            })
    }

    /// Run `backend.open` on a worker and wait for it within the start bound.
    ///
    /// On timeout the worker is abandoned. If it later obtains a session, the
    /// send fails because the receiver is gone and the worker releases the
    /// session itself. Its token is only dropped once that session is gone.
    fn open_with_timeout(
        &self,
        device: &CameraDevice,
        generation: u64,
    ) -> Result<Box<dyn DeviceSession>> {
        let (tx, rx) = crossbeam_channel::bounded::<OpenReply>(1);
        let backend = Arc::clone(&self.backend);
        let device = device.clone();
        let label = self.label.clone();
        let token = WorkerToken::acquire(&self.busy_workers);

        std::thread::Builder::new()
            .name(format!("camera-open-{generation}"))
            .spawn(move || {
                let result = backend.open(&device);
                if let Err(crossbeam_channel::SendError((Ok(late), token))) =
                    tx.send((result, token))
                {
                    warn!(
                        "[{label}] {} started after the controller gave up; releasing it",
                        device.id
                    );
                    if let Err(e) = late.begin_stop() {
                        warn!("[{label}] error releasing late session: {e}");
                    }
                    drop(late);
                    drop(token);
                }
            })
            .map_err(|e| CameraError::Thread(e.to_string()))?;

        match rx.recv_timeout(self.config.start_timeout) {
            // The controller owns the session from here on.
            Ok((result, _token)) => result,
            Err(RecvTimeoutError::Timeout) => Err(CameraError::StartTimeout(
                self.config.start_timeout.as_millis(),
            )),
            Err(RecvTimeoutError::Disconnected) => Err(CameraError::Start(
                "open worker exited without a result".to_string(),
            )),
        }
    }

    /// Run the device's stop handshake on a worker and wait within the stop
    /// bound. Ownership of the handle moves to the worker.
    fn stop_with_timeout(&self, active: ActiveSession) -> StopOutcome {
        let ActiveSession {
            handle, generation, ..
        } = active;
        let timeout = self.config.stop_timeout;
        let (tx, rx) = crossbeam_channel::bounded::<StopOutcome>(1);
        let token = WorkerToken::acquire(&self.busy_workers);

        let spawned = std::thread::Builder::new()
            .name(format!("camera-stop-{generation}"))
            .spawn(move || {
                let outcome = match handle.begin_stop() {
                    Ok(()) if handle.wait_stopped(timeout) => StopOutcome::Confirmed,
                    Ok(()) => StopOutcome::Unconfirmed,
                    Err(e) => StopOutcome::Failed(e),
                };
                // Release before reporting, so a reported stop is a released device.
                drop(handle);
                drop(token);
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            // The closure, with the handle and token, was dropped by the failed spawn.
            return StopOutcome::Failed(CameraError::Thread(e.to_string()));
        }

        rx.recv_timeout(timeout).unwrap_or(StopOutcome::Abandoned)
    }

    /// Pass through `Error` back to `Idle` after a failed start.
    fn fail_start(&self, e: &CameraError) {
        self.set_state(CaptureState::Error);
        warn!("[{}] failed to start: {e}", self.label);
        self.set_state(CaptureState::Idle);
    }

    fn set_state(&self, state: CaptureState) {
        *self.state.lock() = state;
    }

    fn emit(&self, event: StatusEvent) {
        if self.is_disposing() {
            return;
        }
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.status(&event))).is_err() {
                error!("[{}] status listener panicked on {:?}", self.label, event.kind);
            }
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::dummy::{DummyBackend, DummyConfig, DummyProbe, OpenBehavior, StopBehavior};
    use crate::camera::types::{PixelFormat, RawFrame};
    use crate::preview::status::{Severity, StatusKind};
    use std::time::Instant;

    /// Short bounds so timeout paths run quickly.
    fn fast_capture() -> CaptureConfig {
        CaptureConfig {
            start_timeout: Duration::from_millis(300),
            stop_timeout: Duration::from_millis(200),
            selection: DeviceSelection::First,
        }
    }

    fn fast_dummy() -> DummyConfig {
        DummyConfig {
            width: 4,
            height: 2,
            fps: 200.0,
            open_delay: Duration::from_millis(5),
            ..DummyConfig::default()
        }
    }

    type Recorded = Arc<Mutex<Vec<StatusEvent>>>;

    fn controller_with(
        dummy: DummyConfig,
        capture: CaptureConfig,
    ) -> (CaptureController, Arc<DummyProbe>, Recorded) {
        let backend = DummyBackend::with_config(dummy);
        let probe = backend.probe();
        let controller = CaptureController::new("test", Arc::new(backend), capture);
        let events: Recorded = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        controller.subscribe_status(Arc::new(move |event: &StatusEvent| {
            events_clone.lock().push(event.clone());
        }));
        (controller, probe, events)
    }

    fn kinds(events: &Recorded) -> Vec<StatusKind> {
        events.lock().iter().map(|e| e.kind).collect()
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
    fn start_without_devices_reports_no_camera_once() {
        let (controller, probe, events) = controller_with(
            DummyConfig {
                device_count: 0,
                ..fast_dummy()
            },
            fast_capture(),
        );

        controller.start();

        assert_eq!(controller.state(), CaptureState::Idle);
        let recorded = events.lock().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].kind, StatusKind::NoCamera);
        assert_eq!(recorded[0].severity, Severity::Error);
        assert!(recorded[0].message.contains("no camera found"));
        assert_eq!(probe.opens(), 0);
    }

    #[test]
    fn start_with_device_reaches_running_and_delivers_frames() {
        let (controller, probe, events) = controller_with(fast_dummy(), fast_capture());

        controller.start();

        assert_eq!(controller.state(), CaptureState::Running);
        assert_eq!(kinds(&events), vec![StatusKind::Running]);
        assert_eq!(probe.opens(), 1);
        assert!(wait_until(Duration::from_secs(2), || controller
            .channel()
            .sequence()
            > 0));
        let frame = controller.channel().latest().unwrap();
        assert_eq!(frame.generation, controller.generation());
    }

    #[test]
    fn current_device_tracks_the_session() {
        let (controller, _probe, _events) = controller_with(fast_dummy(), fast_capture());
        assert!(controller.current_device().is_none());

        controller.start();
        let device = controller.current_device().unwrap();
        assert_eq!(device.id, DummyBackend::device_id(0));

        controller.stop();
        assert!(controller.current_device().is_none());
    }

    #[test]
    fn repeated_start_is_a_no_op() {
        let (controller, probe, events) = controller_with(fast_dummy(), fast_capture());
        controller.start();
        controller.start();
        controller.start();
        assert_eq!(probe.opens(), 1);
        assert_eq!(kinds(&events), vec![StatusKind::Running]);
    }

    #[test]
    fn hanging_open_times_out_and_late_session_is_released() {
        let (controller, probe, events) = controller_with(
            DummyConfig {
                open: OpenBehavior::Hang(Duration::from_millis(500)),
                ..fast_dummy()
            },
            CaptureConfig {
                start_timeout: Duration::from_millis(100),
                ..fast_capture()
            },
        );

        let begun = Instant::now();
        controller.start();
        let elapsed = begun.elapsed();

        assert!(elapsed < Duration::from_millis(400), "start blocked for {elapsed:?}");
        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(kinds(&events), vec![StatusKind::StartFailed]);
        assert!(events.lock()[0].message.contains("did not confirm start"));
        assert!(!controller.channel().is_open());

        // The abandoned open eventually completes and must release the device.
        assert!(wait_until(Duration::from_secs(3), || probe.opens() == 1
            && probe.open_sessions() == 0));
    }

    #[test]
    fn retry_while_abandoned_open_is_pending_never_doubles_sessions() {
        struct FirstOpenHangs {
            hung: AtomicBool,
            inner: DummyBackend,
        }

        impl CameraBackend for FirstOpenHangs {
            fn enumerate_devices(&self) -> Result<Vec<CameraDevice>> {
                self.inner.enumerate_devices()
            }

            fn open(&self, device: &CameraDevice) -> Result<Box<dyn DeviceSession>> {
                if !self.hung.swap(true, Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(300));
                }
                self.inner.open(device)
            }
        }

        let inner = DummyBackend::with_config(fast_dummy());
        let probe = inner.probe();
        let backend = FirstOpenHangs {
            hung: AtomicBool::new(false),
            inner,
        };
        let controller = CaptureController::new(
            "retry",
            Arc::new(backend),
            CaptureConfig {
                start_timeout: Duration::from_millis(100),
                ..fast_capture()
            },
        );
        let events: Recorded = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        controller.subscribe_status(Arc::new(move |event: &StatusEvent| {
            events_clone.lock().push(event.clone());
        }));

        controller.start();
        assert_eq!(controller.state(), CaptureState::Idle);

        // The first open is still hanging on its worker.
        controller.start();
        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(
            kinds(&events),
            vec![StatusKind::StartFailed, StatusKind::StartFailed]
        );
        assert!(events.lock()[1].message.contains("still being released"));
        assert_eq!(probe.opens(), 0);

        assert!(wait_until(Duration::from_secs(2), || {
            controller.start();
            controller.state() == CaptureState::Running
        }));
        assert_eq!(probe.opens(), 2);
        assert_eq!(probe.max_concurrent(), 1);
    }

    #[test]
    fn listeners_may_call_back_into_the_controller() {
        let backend = DummyBackend::with_config(fast_dummy());
        let controller = Arc::new(CaptureController::new(
            "reentrant",
            Arc::new(backend),
            fast_capture(),
        ));
        let seen: Arc<Mutex<Vec<Option<CameraDevice>>>> = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&controller);
        let seen_clone = Arc::clone(&seen);
        controller.subscribe_status(Arc::new(move |event: &StatusEvent| {
            let Some(controller) = weak.upgrade() else {
                return;
            };
            seen_clone.lock().push(controller.current_device());
            if event.kind == StatusKind::Running {
                controller.stop();
            }
        }));

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let runner = Arc::clone(&controller);
        std::thread::spawn(move || {
            runner.start();
            let _ = done_tx.send(());
        });

        assert!(
            done_rx.recv_timeout(Duration::from_secs(2)).is_ok(),
            "start did not return while a listener called back in"
        );
        assert_eq!(controller.state(), CaptureState::Idle);
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0].as_ref().map(|d| d.id.clone()),
            Some(DummyBackend::device_id(0))
        );
        assert!(seen[1].is_none());
    }

    #[test]
    fn failed_open_returns_to_idle_and_can_retry() {
        struct FlakyBackend {
            failures_left: AtomicUsize,
            inner: DummyBackend,
        }

        impl CameraBackend for FlakyBackend {
            fn enumerate_devices(&self) -> Result<Vec<CameraDevice>> {
                self.inner.enumerate_devices()
            }

            fn open(&self, device: &CameraDevice) -> Result<Box<dyn DeviceSession>> {
                if self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return Err(CameraError::Start("device busy".to_string()));
                }
                self.inner.open(device)
            }
        }

        let backend = FlakyBackend {
            failures_left: AtomicUsize::new(1),
            inner: DummyBackend::with_config(fast_dummy()),
        };
        let controller = CaptureController::new("flaky", Arc::new(backend), fast_capture());
        let events: Recorded = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        controller.subscribe_status(Arc::new(move |event: &StatusEvent| {
            events_clone.lock().push(event.clone());
        }));

        controller.start();
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(events.lock()[0].message.contains("device busy"));

        controller.start();
        assert_eq!(controller.state(), CaptureState::Running);
        assert_eq!(
            kinds(&events),
            vec![StatusKind::StartFailed, StatusKind::Running]
        );
    }

    #[test]
    fn graceful_stop_clears_slot_and_reports_stopped() {
        let (controller, probe, events) = controller_with(fast_dummy(), fast_capture());
        controller.start();
        assert!(wait_until(Duration::from_secs(2), || controller
            .channel()
            .latest()
            .is_some()));

        controller.stop();

        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(
            kinds(&events),
            vec![StatusKind::Running, StatusKind::Stopped]
        );
        assert!(controller.channel().latest().is_none());
        assert_eq!(probe.open_sessions(), 0);
    }

    #[test]
    fn unresponsive_stop_is_bounded() {
        let (controller, _probe, events) = controller_with(
            DummyConfig {
                stop: StopBehavior::Hang(Duration::from_secs(2)),
                ..fast_dummy()
            },
            fast_capture(),
        );
        controller.start();

        let begun = Instant::now();
        controller.stop();
        let elapsed = begun.elapsed();

        assert!(
            elapsed < Duration::from_millis(200) + Duration::from_millis(300),
            "stop blocked for {elapsed:?}"
        );
        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(kinds(&events).last(), Some(&StatusKind::Stopped));
    }

    #[test]
    fn device_ignoring_stop_signal_still_ends_idle() {
        let (controller, probe, _events) = controller_with(
            DummyConfig {
                stop: StopBehavior::Unresponsive,
                ..fast_dummy()
            },
            fast_capture(),
        );
        controller.start();
        controller.stop();
        assert_eq!(controller.state(), CaptureState::Idle);
        // Released once the abandoned worker drops the handle.
        assert!(wait_until(Duration::from_secs(2), || probe.open_sessions() == 0));
    }

    #[test]
    fn failing_stop_is_best_effort() {
        let (controller, _probe, events) = controller_with(
            DummyConfig {
                stop: StopBehavior::Fail,
                ..fast_dummy()
            },
            fast_capture(),
        );
        controller.start();
        controller.stop();
        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(kinds(&events).last(), Some(&StatusKind::Stopped));
    }

    #[test]
    fn stop_when_idle_is_a_no_op() {
        let (controller, _probe, events) = controller_with(fast_dummy(), fast_capture());
        controller.stop();
        controller.stop();
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(events.lock().is_empty());
    }

    #[test]
    fn frames_from_lingering_producer_are_discarded_after_stop() {
        let (controller, _probe, _events) = controller_with(fast_dummy(), fast_capture());
        controller.start();
        let lingering = controller.channel().callback_for(controller.generation());

        controller.stop();
        let sequence = controller.channel().sequence();
        let data = [1u8; 4 * 2 * 3];
        lingering(&RawFrame {
            data: &data,
            width: 4,
            height: 2,
            format: PixelFormat::Rgb24,
            timestamp_us: 0,
        });

        assert!(controller.channel().latest().is_none());
        assert_eq!(controller.channel().sequence(), sequence);
    }

    #[test]
    fn dispose_makes_start_a_permanent_no_op() {
        let (controller, probe, events) = controller_with(fast_dummy(), fast_capture());
        controller.start();
        controller.dispose();
        events.lock().clear();

        for _ in 0..3 {
            controller.start();
        }

        assert_eq!(probe.opens(), 1);
        assert_eq!(probe.open_sessions(), 0);
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(events.lock().is_empty());
    }

    #[test]
    fn dispose_during_start_leaves_no_session_open() {
        let backend = DummyBackend::with_config(DummyConfig {
            open_delay: Duration::from_millis(100),
            ..fast_dummy()
        });
        let probe = backend.probe();
        let controller = Arc::new(CaptureController::new(
            "racing",
            Arc::new(backend),
            fast_capture(),
        ));

        let starter = {
            let controller = Arc::clone(&controller);
            std::thread::spawn(move || controller.start())
        };
        std::thread::sleep(Duration::from_millis(20));
        controller.dispose();
        starter.join().unwrap();

        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(wait_until(Duration::from_secs(2), || probe.open_sessions() == 0));
        controller.start();
        assert_eq!(probe.open_sessions(), 0);
    }

    #[test]
    fn interleaved_start_stop_never_opens_two_sessions() {
        let (controller, probe, _events) = controller_with(
            fast_dummy(),
            CaptureConfig {
                stop_timeout: Duration::from_millis(500),
                ..fast_capture()
            },
        );
        let controller = Arc::new(controller);

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let controller = Arc::clone(&controller);
                std::thread::spawn(move || {
                    for round in 0..5 {
                        if (i + round) % 2 == 0 {
                            controller.start();
                        } else {
                            controller.stop();
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        controller.stop();

        assert!(probe.opens() >= 1);
        assert_eq!(probe.max_concurrent(), 1);
        assert_eq!(probe.open_sessions(), 0);
    }

    #[test]
    fn enumeration_failure_is_reported_not_raised() {
        let (controller, _probe, events) = controller_with(
            DummyConfig {
                fail_enumeration: true,
                ..fast_dummy()
            },
            fast_capture(),
        );
        controller.start();
        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(kinds(&events), vec![StatusKind::EnumerationFailed]);
    }

    #[test]
    fn by_id_selection_opens_the_requested_device() {
        let (controller, _probe, events) = controller_with(
            DummyConfig {
                device_count: 2,
                ..fast_dummy()
            },
            CaptureConfig {
                selection: DeviceSelection::ById(DummyBackend::device_id(1)),
                ..fast_capture()
            },
        );
        controller.start();
        assert_eq!(controller.state(), CaptureState::Running);
        assert!(events.lock()[0].message.ends_with("Dummy Test Camera 2"));
    }

    #[test]
    fn by_id_selection_of_missing_device_fails_to_start() {
        let (controller, probe, events) = controller_with(
            fast_dummy(),
            CaptureConfig {
                selection: DeviceSelection::ById(DeviceId::new("missing")),
                ..fast_capture()
            },
        );
        controller.start();
        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(kinds(&events), vec![StatusKind::StartFailed]);
        assert_eq!(probe.opens(), 0);
    }

    #[test]
    fn probe_devices_reports_count() {
        let (controller, _probe, events) = controller_with(
            DummyConfig {
                device_count: 2,
                ..fast_dummy()
            },
            fast_capture(),
        );
        assert_eq!(controller.probe_devices(), 2);
        assert_eq!(events.lock()[0].message, "found 2 cameras");
    }

    #[test]
    fn panicking_listener_does_not_break_start() {
        let (controller, _probe, events) = controller_with(fast_dummy(), fast_capture());
        controller.subscribe_status(Arc::new(|_event: &StatusEvent| panic!("listener bug")));
        controller.start();
        assert_eq!(controller.state(), CaptureState::Running);
        assert_eq!(kinds(&events), vec![StatusKind::Running]);
    }

    #[test]
    fn restart_uses_a_new_generation() {
        let (controller, _probe, _events) = controller_with(fast_dummy(), fast_capture());
        controller.start();
        let first = controller.generation();
        controller.stop();
        controller.start();
        assert_eq!(controller.generation(), first + 1);
        assert!(wait_until(Duration::from_secs(2), || controller
            .channel()
            .latest()
            .is_some_and(|f| f.generation == first + 1)));
    }

    #[test]
    fn capture_controller_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CaptureController>();
    }
}
