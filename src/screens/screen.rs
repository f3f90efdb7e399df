use crossbeam_channel::Sender;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::types::{ScreenId, ScreenKey};
use super::ui::{QueueFrameSink, UiMessage};
use crate::camera::backend::CameraBackend;
use crate::diagnostics::stats::DiagnosticSnapshot;
use crate::preview::capture::Frame;
use crate::preview::session::{CaptureConfig, CaptureController, CaptureState};
use crate::preview::status::StatusEvent;

/// The image currently shown by a screen.
#[derive(Default)]
pub struct DisplaySurface {
    image: Option<Arc<Frame>>,
    rendered: u64,
}

impl DisplaySurface {
    /// Replace the current image. The previous one is released here.
    pub fn present(&mut self, frame: Arc<Frame>) {
        self.image = Some(frame);
        self.rendered += 1;
    }

    pub fn clear(&mut self) {
        self.image = None;
    }

    pub fn image(&self) -> Option<&Arc<Frame>> {
        self.image.as_ref()
    }

    /// Number of frames presented since the screen was created.
    pub fn rendered(&self) -> u64 {
        self.rendered
    }
}

/// Point-in-time summary of a screen, printed by the `status` command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenReport {
    pub title: String,
    pub visible: bool,
    pub state: CaptureState,
    pub generation: u64,
    pub rendered: u64,
    pub status: Option<String>,
    pub diagnostics: DiagnosticSnapshot,
}

/// One screen: a capture controller composed with a display surface and a
/// status line. Only the UI thread touches a `Screen`.
pub struct Screen {
    key: ScreenKey,
    id: ScreenId,
    controller: CaptureController,
    surface: DisplaySurface,
    status: Option<StatusEvent>,
    visible: bool,
}

impl Screen {
    /// Build a hidden screen whose status and frame notifications are posted
    /// to `tx`, and report which cameras it can see.
    pub fn new(
        key: ScreenKey,
        id: ScreenId,
        backend: Arc<dyn CameraBackend>,
        config: CaptureConfig,
        tx: Sender<UiMessage>,
    ) -> Self {
        let controller = CaptureController::new(id.title(), backend, config);

        let status_tx = tx.clone();
        controller.subscribe_status(Arc::new(move |event: &StatusEvent| {
            let _ = status_tx.send(UiMessage::Status {
                screen: key,
                event: event.clone(),
            });
        }));
        controller
            .channel()
            .set_sink(Some(Arc::new(QueueFrameSink::new(key, tx))));
        controller.probe_devices();

        Self {
            key,
            id,
            controller,
            surface: DisplaySurface::default(),
            status: None,
            visible: false,
        }
    }

    /// Make the screen visible and start capture immediately.
    pub fn show(&mut self) {
        self.visible = true;
        self.controller.start();
    }

    /// Make the screen visible without starting capture.
    pub fn reveal(&mut self) {
        self.visible = true;
    }

    /// Stop capture and hide. Returns once the controller is idle.
    pub fn hide(&mut self) {
        self.controller.stop();
        self.visible = false;
    }

    /// Permanent teardown.
    pub fn close(&mut self) {
        self.visible = false;
        self.controller.dispose();
        self.surface.clear();
    }

    /// Start capture if the screen is still showing. Used for delayed
    /// restarts, which may arrive after the user navigated away again.
    pub fn restart(&mut self) {
        if self.visible && !self.controller.is_disposing() {
            self.controller.start();
        } else {
            debug!("[{}] restart skipped: screen no longer showing", self.id);
        }
    }

    pub fn on_status(&mut self, event: StatusEvent) {
        self.status = Some(event);
    }

    /// Pull the newest frame, if one is still deliverable.
    pub fn on_frame_ready(&mut self) {
        if let Some(frame) = self.controller.channel().take_latest() {
            self.surface.present(frame);
        }
    }

    pub fn on_frame_cleared(&mut self) {
        self.surface.clear();
    }

    pub fn key(&self) -> ScreenKey {
        self.key
    }

    pub fn id(&self) -> ScreenId {
        self.id
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn capture_state(&self) -> CaptureState {
        self.controller.state()
    }

    pub fn surface(&self) -> &DisplaySurface {
        &self.surface
    }

    pub fn status(&self) -> Option<&StatusEvent> {
        self.status.as_ref()
    }

    pub fn report(&self) -> ScreenReport {
        ScreenReport {
            title: self.id.title().to_string(),
            visible: self.visible,
            state: self.controller.state(),
            generation: self.controller.generation(),
            rendered: self.surface.rendered(),
            status: self.status.as_ref().map(|s| s.message.clone()),
            diagnostics: self.controller.diagnostics(),
        }
    }
}
