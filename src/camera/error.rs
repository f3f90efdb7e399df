use thiserror::Error;

/// Camera subsystem errors.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("no camera found")]
    NoDevice,

    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("device start failed: {0}")]
    Start(String),

    #[error("device did not confirm start within {0} ms")]
    StartTimeout(u128),

    #[error("device stop failed: {0}")]
    Stop(String),

    #[error("device did not confirm stop within {0} ms")]
    StopTimeout(u128),

    #[error("frame processing failed: {0}")]
    FrameProcessing(String),

    #[error("failed to spawn worker thread: {0}")]
    Thread(String),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, CameraError>;
