use crossbeam_channel::Sender;
use std::sync::Arc;
use tracing::{info, warn};

use super::screen::Screen;
use super::types::{ScreenId, ScreenKey};
use super::ui::{Command, UiMessage};
use crate::camera::backend::CameraBackend;
use crate::config::AppConfig;

/// Whether the UI loop keeps running after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Owns the open screens as a stack (last = visible) and enforces the camera
/// hand-off between them: the outgoing screen is stopped, synchronously,
/// before the incoming screen starts, so at most one session runs at a time.
pub struct Navigator {
    backend: Arc<dyn CameraBackend>,
    config: AppConfig,
    tx: Sender<UiMessage>,
    screens: Vec<Screen>,
    next_key: u64,
}

impl Navigator {
    pub fn new(backend: Arc<dyn CameraBackend>, config: AppConfig, tx: Sender<UiMessage>) -> Self {
        Self {
            backend,
            config,
            tx,
            screens: Vec::new(),
            next_key: 1,
        }
    }

    /// Open and show the first screen.
    pub fn launch(&mut self) {
        if !self.screens.is_empty() {
            return;
        }
        let mut screen = self.create(ScreenId::Main);
        screen.show();
        self.screens.push(screen);
    }

    /// Move to the next screen. Returns `false` on the last screen.
    pub fn forward(&mut self) -> bool {
        let Some(next) = self.current().and_then(|s| s.id().next()) else {
            return false;
        };
        if let Some(outgoing) = self.screens.last_mut() {
            outgoing.hide();
        }

        let mut incoming = self.create(next);
        incoming.show();
        info!("navigated forward to {next}");
        self.screens.push(incoming);
        true
    }

    /// Close the current screen and reshow the previous one, restarting its
    /// camera after `restart_delay`. Returns `false` on the first screen.
    pub fn back(&mut self) -> bool {
        let Some(target) = self.current().and_then(|s| s.id().previous()) else {
            return false;
        };
        if let Some(mut outgoing) = self.screens.pop() {
            outgoing.hide();
            outgoing.close();
        }

        let reshown = self
            .screens
            .last()
            .filter(|s| s.id() == target)
            .map(Screen::key);
        match reshown {
            Some(key) => {
                if let Some(existing) = self.find_mut(key) {
                    existing.reveal();
                }
                self.schedule_restart(key);
            }
            None => {
                let mut screen = self.create(target);
                screen.show();
                self.screens.push(screen);
            }
        }
        info!("navigated back to {target}");
        true
    }

    /// Dispose every open screen, newest first.
    pub fn shutdown(&mut self) {
        while let Some(mut screen) = self.screens.pop() {
            screen.close();
        }
    }

    /// Apply one UI message. Messages for screens that are already closed
    /// are ignored.
    pub fn handle(&mut self, message: UiMessage) -> Flow {
        match message {
            UiMessage::Status { screen, event } => {
                if let Some(s) = self.find_mut(screen) {
                    s.on_status(event);
                }
            }
            UiMessage::FrameReady { screen, .. } => {
                if let Some(s) = self.find_mut(screen) {
                    s.on_frame_ready();
                }
            }
            UiMessage::FrameCleared { screen } => {
                if let Some(s) = self.find_mut(screen) {
                    s.on_frame_cleared();
                }
            }
            UiMessage::Restart { screen } => {
                if let Some(s) = self.find_mut(screen) {
                    s.restart();
                }
            }
            UiMessage::Command(Command::Next) => {
                self.forward();
            }
            UiMessage::Command(Command::Back) => {
                self.back();
            }
            UiMessage::Command(Command::Status) => {}
            UiMessage::Command(Command::Quit) | UiMessage::InputClosed => {
                self.shutdown();
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    /// The visible screen.
    pub fn current(&self) -> Option<&Screen> {
        self.screens.last()
    }

    pub fn screens(&self) -> &[Screen] {
        &self.screens
    }

    pub fn find(&self, key: ScreenKey) -> Option<&Screen> {
        self.screens.iter().find(|s| s.key() == key)
    }

    fn find_mut(&mut self, key: ScreenKey) -> Option<&mut Screen> {
        self.screens.iter_mut().find(|s| s.key() == key)
    }

    fn create(&mut self, id: ScreenId) -> Screen {
        let key = ScreenKey(self.next_key);
        self.next_key += 1;
        Screen::new(
            key,
            id,
            Arc::clone(&self.backend),
            self.config.capture.clone(),
            self.tx.clone(),
        )
    }

    /// Post a `Restart` for `key` after `restart_delay`.
    fn schedule_restart(&self, key: ScreenKey) {
        let tx = self.tx.clone();
        let delay = self.config.restart_delay;
        let spawned = std::thread::Builder::new()
            .name(format!("restart-{}", key.0))
            .spawn(move || {
                std::thread::sleep(delay);
                let _ = tx.send(UiMessage::Restart { screen: key });
            });
        if let Err(e) = spawned {
            warn!("failed to spawn restart timer: {e}; restarting on next drain");
            let _ = self.tx.send(UiMessage::Restart { screen: key });
        }
    }
}

impl Drop for Navigator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
