use crossbeam_channel::Sender;

use super::types::ScreenKey;
use crate::preview::capture::FrameSink;
use crate::preview::status::StatusEvent;

/// User input understood by the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Next,
    Back,
    Status,
    Quit,
}

impl Command {
    /// Parse one line of terminal input.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "n" | "next" => Some(Self::Next),
            "b" | "back" => Some(Self::Back),
            "s" | "status" => Some(Self::Status),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Everything the UI thread reacts to. Capture threads, timers and the input
/// reader only ever post these; the UI thread drains them on its own schedule.
#[derive(Debug)]
pub enum UiMessage {
    Status { screen: ScreenKey, event: StatusEvent },
    FrameReady { screen: ScreenKey, generation: u64 },
    FrameCleared { screen: ScreenKey },
    /// Delayed restart of a screen reshown by backward navigation.
    Restart { screen: ScreenKey },
    Command(Command),
    InputClosed,
}

/// Posts frame notifications for one screen onto the UI queue.
pub struct QueueFrameSink {
    screen: ScreenKey,
    tx: Sender<UiMessage>,
}

impl QueueFrameSink {
    pub fn new(screen: ScreenKey, tx: Sender<UiMessage>) -> Self {
        Self { screen, tx }
    }
}

impl FrameSink for QueueFrameSink {
    fn frame_ready(&self, generation: u64) {
        // Unbounded send: never blocks the producer. A closed queue means the
        // UI is gone and the frame is simply dropped.
        let _ = self.tx.send(UiMessage::FrameReady {
            screen: self.screen,
            generation,
        });
    }

    fn cleared(&self) {
        let _ = self.tx.send(UiMessage::FrameCleared {
            screen: self.screen,
        });
    }
}
