use serde::Serialize;
use std::time::Instant;

/// Collects delivery statistics for one frame channel.
pub struct DiagnosticStats {
    received: u64,
    delivered: u64,
    superseded: u64,
    rejected: u64,
    failed: u64,
    total_bytes: u64,
    start_time: Instant,
    last_frame_time: Option<Instant>,
}

/// Snapshot of diagnostic stats for display or serialisation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSnapshot {
    pub fps: f64,
    pub received: u64,
    pub delivered: u64,
    pub superseded: u64,
    pub rejected: u64,
    pub failed: u64,
    pub drop_rate: f64,
    pub bandwidth_bps: u64,
    /// Milliseconds since the last accepted frame, `None` before the first.
    pub since_last_frame_ms: Option<u64>,
}

impl DiagnosticStats {
    /// Create new stats with zeroed counters.
    pub fn new() -> Self {
        Self {
            received: 0,
            delivered: 0,
            superseded: 0,
            rejected: 0,
            failed: 0,
            total_bytes: 0,
            start_time: Instant::now(),
            last_frame_time: None,
        }
    }

    /// Record a frame accepted into the slot.
    pub fn record_frame(&mut self, bytes: usize) {
        self.received += 1;
        self.total_bytes += bytes as u64;
        self.last_frame_time = Some(Instant::now());
    }

    /// Record a frame handed to the consumer.
    pub fn record_delivery(&mut self) {
        self.delivered += 1;
    }

    /// Record an unconsumed frame replaced by a newer one.
    pub fn record_superseded(&mut self) {
        self.superseded += 1;
    }

    /// Record a frame refused because the channel was closed or the
    /// generation was stale.
    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    /// Record a frame that could not be copied.
    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Accepted-frame rate since the last reset.
    pub fn fps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0.0;
        }
        self.received as f64 / elapsed
    }

    /// Share of produced frames that never reached the consumer (0.0 - 100.0).
    pub fn drop_rate(&self) -> f64 {
        let dropped = self.superseded + self.rejected + self.failed;
        let total = self.received + self.rejected + self.failed;
        if total == 0 {
            return 0.0;
        }
        (dropped as f64 / total as f64) * 100.0
    }

    /// Bandwidth in bytes per second.
    pub fn bandwidth_bps(&self) -> u64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0;
        }
        (self.total_bytes as f64 / elapsed) as u64
    }

    /// Time since the last accepted frame, if any.
    pub fn since_last_frame(&self) -> Option<std::time::Duration> {
        self.last_frame_time.map(|t| t.elapsed())
    }

    /// Reset all counters.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Take a serialisable snapshot.
    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            fps: self.fps(),
            received: self.received,
            delivered: self.delivered,
            superseded: self.superseded,
            rejected: self.rejected,
            failed: self.failed,
            drop_rate: self.drop_rate(),
            bandwidth_bps: self.bandwidth_bps(),
            since_last_frame_ms: self
                .since_last_frame()
                .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64),
        }
    }
}

impl Default for DiagnosticStats {
    fn default() -> Self {
        Self::new()
    }
}
