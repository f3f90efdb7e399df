use serde::Serialize;

/// Severity attached to a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// What happened, independent of the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusKind {
    DevicesFound,
    NoCamera,
    EnumerationFailed,
    Running,
    StartFailed,
    Stopped,
}

/// Payload delivered to status listeners whenever the capture state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub kind: StatusKind,
    pub message: String,
    pub severity: Severity,
}

impl StatusEvent {
    pub fn devices_found(count: usize) -> Self {
        let noun = if count == 1 { "camera" } else { "cameras" };
        Self::new(
            StatusKind::DevicesFound,
            format!("found {count} {noun}"),
            Severity::Info,
        )
    }

    pub fn no_camera() -> Self {
        Self::new(StatusKind::NoCamera, "no camera found", Severity::Error)
    }

    pub fn enumeration_failed(reason: impl std::fmt::Display) -> Self {
        Self::new(
            StatusKind::EnumerationFailed,
            format!("camera enumeration failed: {reason}"),
            Severity::Error,
        )
    }

    pub fn running(device_name: &str) -> Self {
        Self::new(
            StatusKind::Running,
            format!("running: {device_name}"),
            Severity::Info,
        )
    }

    pub fn start_failed(reason: impl std::fmt::Display) -> Self {
        Self::new(
            StatusKind::StartFailed,
            format!("failed to start: {reason}"),
            Severity::Error,
        )
    }

    pub fn stopped() -> Self {
        Self::new(StatusKind::Stopped, "stopped", Severity::Warning)
    }

    fn new(kind: StatusKind, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            kind,
            message: message.into(),
            severity,
        }
    }
}

/// Receives status events. Called on whatever thread runs controller logic;
/// implementations marshal onto their own rendering context.
pub trait StatusSink: Send + Sync {
    fn status(&self, event: &StatusEvent);
}

impl<F> StatusSink for F
where
    F: Fn(&StatusEvent) + Send + Sync,
{
    fn status(&self, event: &StatusEvent) {
        self(event)
    }
}
