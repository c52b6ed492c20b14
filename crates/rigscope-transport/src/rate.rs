//! Per-stream frame-rate and bandwidth accounting.
//!
//! The reader task owns a [`StreamRateTracker`] and is the only writer. Each
//! update ends by swapping a fresh [`RateSnapshot`] into a `watch` slot, so
//! readers on other tasks copy a small value out and never see a
//! half-updated set of counters.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rigscope_core::ChannelState;
use tokio::sync::watch;

/// Rates are recomputed once at least this much time has passed.
pub const RATE_PERIOD: Duration = Duration::from_secs(1);

// ── RollingRateWindow ─────────────────────────────────────────────────────────

/// Fixed-capacity FIFO of per-second rate samples.
#[derive(Debug, Clone)]
pub struct RollingRateWindow {
    samples:  VecDeque<f64>,
    capacity: usize,
}

impl RollingRateWindow {
    /// `capacity` is clamped to at least one sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append a sample, returning the evicted oldest one when full.
    pub fn push(&mut self, sample: f64) -> Option<f64> {
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn peak(&self) -> f64 {
        self.samples.iter().copied().fold(0.0, f64::max)
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

// ── RateSnapshot ──────────────────────────────────────────────────────────────

/// Point-in-time view of one stream, cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateSnapshot {
    pub state:          ChannelState,
    /// Rate of the most recent completed period.
    pub current_fps:    f64,
    pub average_fps:    f64,
    pub peak_fps:       f64,
    pub total_frames:   u64,
    pub total_bytes:    u64,
    /// Bandwidth of the most recent completed period.
    pub bandwidth_mbps: f64,
    /// Samples currently in the rolling window.
    pub samples:        usize,
}

/// Read side handed to the reporting consumer.
#[derive(Debug, Clone)]
pub struct RateMonitor {
    rx: watch::Receiver<RateSnapshot>,
}

impl RateMonitor {
    /// Most recently published counters; never blocks the reader.
    pub fn latest_snapshot(&self) -> RateSnapshot {
        *self.rx.borrow()
    }
}

// ── StreamRateTracker ─────────────────────────────────────────────────────────

/// Write side, owned by the stream's reader.
#[derive(Debug)]
pub struct StreamRateTracker {
    window:        RollingRateWindow,
    frames_since:  u64,
    bytes_since:   u64,
    period_start:  Option<Instant>,
    published:     RateSnapshot,
    tx:            watch::Sender<RateSnapshot>,
}

impl StreamRateTracker {
    pub fn new(window_capacity: usize) -> Self {
        let (tx, _rx) = watch::channel(RateSnapshot::default());
        Self {
            window: RollingRateWindow::new(window_capacity),
            frames_since: 0,
            bytes_since: 0,
            period_start: None,
            published: RateSnapshot::default(),
            tx,
        }
    }

    pub fn monitor(&self) -> RateMonitor {
        RateMonitor { rx: self.tx.subscribe() }
    }

    pub fn snapshot(&self) -> RateSnapshot {
        *self.tx.borrow()
    }

    pub fn window(&self) -> &RollingRateWindow {
        &self.window
    }

    /// Account received bytes; they are published with the next frame update.
    pub fn record_bytes(&mut self, n: usize) {
        self.bytes_since += n as u64;
        self.published.total_bytes += n as u64;
    }

    /// Account `n` frame boundaries observed at `now` and publish.
    pub fn record_frames(&mut self, n: usize, now: Instant) {
        self.record_chunk(0, n, now);
    }

    /// Account one read: `bytes` received holding `frames` boundaries.
    ///
    /// The period is closed *before* the new chunk is added, so the chunk
    /// that crosses the one-second mark opens the next period instead of
    /// inflating the current one.
    pub fn record_chunk(&mut self, bytes: usize, frames: usize, now: Instant) {
        match self.period_start {
            None => self.period_start = Some(now),
            Some(start) => {
                let elapsed = now.saturating_duration_since(start);
                if elapsed >= RATE_PERIOD {
                    self.close_period(elapsed, now);
                }
            }
        }
        self.record_bytes(bytes);
        self.frames_since += frames as u64;
        self.published.total_frames += frames as u64;
        self.publish();
    }

    pub fn set_state(&mut self, state: ChannelState) {
        if self.published.state != state {
            self.published.state = state;
            self.publish();
        }
    }

    /// Producer went quiet or the connection ended at `now`.
    ///
    /// A period that has run for at least [`RATE_PERIOD`] is closed first,
    /// so silence feeds zero samples into the window; the published current
    /// rate and bandwidth drop to zero either way.
    pub fn mark_idle(&mut self, now: Instant) {
        if let Some(start) = self.period_start {
            let elapsed = now.saturating_duration_since(start);
            if elapsed >= RATE_PERIOD {
                self.close_period(elapsed, now);
            }
        }
        self.published.state = ChannelState::Idle;
        self.published.current_fps = 0.0;
        self.published.bandwidth_mbps = 0.0;
        self.publish();
    }

    /// Forget the open period, e.g. after a reconnect, keeping totals and
    /// the rolling window.
    pub fn restart_period(&mut self) {
        self.period_start = None;
        self.frames_since = 0;
        self.bytes_since = 0;
    }

    fn close_period(&mut self, elapsed: Duration, now: Instant) {
        let secs = elapsed.as_secs_f64();
        let fps = self.frames_since as f64 / secs;
        self.window.push(fps);

        self.published.current_fps = fps;
        self.published.bandwidth_mbps = (self.bytes_since as f64 * 8.0) / (secs * 1_000_000.0);
        self.published.average_fps = self.window.average();
        self.published.peak_fps = self.window.peak();
        self.published.samples = self.window.len();

        self.frames_since = 0;
        self.bytes_since = 0;
        self.period_start = Some(now);
    }

    fn publish(&self) {
        self.tx.send_replace(self.published);
    }
}
