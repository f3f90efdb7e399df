use std::time::Duration;

use crate::preview::session::CaptureConfig;

const START_TIMEOUT_VAR: &str = "WEBCAM_START_TIMEOUT_MS";
const STOP_TIMEOUT_VAR: &str = "WEBCAM_STOP_TIMEOUT_MS";
const RESTART_DELAY_VAR: &str = "WEBCAM_RESTART_DELAY_MS";

/// Application settings, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    /// Delay before a screen reshown by backward navigation restarts capture.
    pub restart_delay: Duration,
    /// Use the simulated camera instead of the platform backend.
    pub dummy_camera: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            restart_delay: Duration::from_millis(500),
            dummy_camera: false,
        }
    }
}

impl AppConfig {
    /// Build from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(timeout) = duration_var(&lookup, START_TIMEOUT_VAR) {
            config.capture.start_timeout = timeout;
        }
        if let Some(timeout) = duration_var(&lookup, STOP_TIMEOUT_VAR) {
            config.capture.stop_timeout = timeout;
        }
        if let Some(delay) = duration_var(&lookup, RESTART_DELAY_VAR) {
            config.restart_delay = delay;
        }
        config.dummy_camera = lookup("DUMMY_CAMERA").is_some_and(|v| v == "1" || v == "true");

        config
    }
}

fn duration_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(e) => {
            tracing::warn!("ignoring {key}={raw:?}: {e}");
            None
        }
    }
}
