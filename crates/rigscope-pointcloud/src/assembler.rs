use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rigscope_core::{errors::DecoderError, CameraIntrinsics, ColorConfig, DepthConfig, DepthFrame, Resolution};
use rigscope_decoder::DepthCodec;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::color::SurfaceColorMapper;
use crate::projector::DepthProjector;

/// Interval between "Point Cloud FPS" log lines.
pub const FPS_LOG_PERIOD: Duration = Duration::from_secs(2);

// ── PointCloudFrame ───────────────────────────────────────────────────────────

/// One reconstructed cloud. `positions[i]` and `colors[i]` describe the same
/// pixel; the constructor refuses mismatched lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloudFrame {
    sequence:  u64,
    source:    Resolution,
    positions: Vec<[f32; 3]>,
    colors:    Vec<[f32; 3]>,
}

impl PointCloudFrame {
    pub fn new(
        sequence: u64,
        source: Resolution,
        positions: Vec<[f32; 3]>,
        colors: Vec<[f32; 3]>,
    ) -> Option<Self> {
        (positions.len() == colors.len()).then_some(Self { sequence, source, positions, colors })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Resolution of the depth image this cloud was built from.
    pub fn source(&self) -> Resolution {
        self.source
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn colors(&self) -> &[[f32; 3]] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

// ── PointCloudHandle ──────────────────────────────────────────────────────────

/// Read side handed to the renderer. Cloning is cheap; every reader sees
/// the most recently published cloud or none.
#[derive(Debug, Clone)]
pub struct PointCloudHandle {
    rx: watch::Receiver<Option<Arc<PointCloudFrame>>>,
}

impl PointCloudHandle {
    pub fn latest_point_cloud(&self) -> Option<Arc<PointCloudFrame>> {
        self.rx.borrow().clone()
    }

    /// Wait for the next publication. `None` once the assembler is gone.
    pub async fn changed(&mut self) -> Option<Arc<PointCloudFrame>> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }
}

// ── PointCloudAssembler ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssembleOutcome {
    Published { points: usize },
    /// Too few valid samples; the previous cloud stays current.
    Retained { points: usize },
}

pub struct PointCloudAssembler {
    projector:  DepthProjector,
    mapper:     SurfaceColorMapper,
    min_points: usize,
    tx:         watch::Sender<Option<Arc<PointCloudFrame>>>,
    sequence:   u64,
    fps:        FpsLog,
}

impl PointCloudAssembler {
    pub fn new(intrinsics: CameraIntrinsics, depth: &DepthConfig, color: ColorConfig) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            projector: DepthProjector::new(intrinsics, depth),
            mapper: SurfaceColorMapper::new(color),
            min_points: depth.min_points,
            tx,
            sequence: 0,
            fps: FpsLog::new(Instant::now()),
        }
    }

    pub fn handle(&self) -> PointCloudHandle {
        PointCloudHandle { rx: self.tx.subscribe() }
    }

    pub fn latest_point_cloud(&self) -> Option<Arc<PointCloudFrame>> {
        self.tx.borrow().clone()
    }

    /// Build a cloud from `frame` without publishing it. Deterministic:
    /// the same grid always yields the same cloud.
    pub fn build(&self, sequence: u64, frame: &DepthFrame) -> PointCloudFrame {
        let positions = self.projector.project(frame);
        let colors = self.mapper.colorize(frame, |s| self.projector.is_valid(s));
        // Both walks share the projector's mask.
        debug_assert_eq!(positions.len(), colors.len());
        PointCloudFrame { sequence, source: frame.resolution(), positions, colors }
    }

    /// Reconstruct `frame` and publish it unless it is too sparse.
    pub fn ingest(&mut self, frame: &DepthFrame) -> AssembleOutcome {
        let valid = self.projector.count_valid(frame);
        if valid < self.min_points {
            debug!("Assembler sparse frame ({} < {} points), keeping previous", valid, self.min_points);
            return AssembleOutcome::Retained { points: valid };
        }

        self.sequence += 1;
        let cloud = self.build(self.sequence, frame);
        let points = cloud.len();
        self.tx.send_replace(Some(Arc::new(cloud)));

        if let Some(fps) = self.fps.tick(Instant::now()) {
            info!("Point Cloud FPS: {:.1} | Points: {}", fps, points);
        }
        AssembleOutcome::Published { points }
    }

    /// Decode and ingest payloads until `rx` closes or `cancel` fires.
    ///
    /// Blocking: call from `spawn_blocking`. Decode failures keep the
    /// previous cloud.
    pub fn run_blocking<C: DepthCodec>(
        mut self,
        mut codec: C,
        mut rx: mpsc::Receiver<Bytes>,
        cancel: CancellationToken,
    ) {
        info!("Assembler started with {} codec", codec.name());
        let mut failures: u64 = 0;

        while let Some(payload) = rx.blocking_recv() {
            if cancel.is_cancelled() {
                break;
            }
            match codec.decode(&payload) {
                Ok(frame) => {
                    self.ingest(&frame);
                }
                Err(e) => {
                    failures += 1;
                    if failures <= 10 || failures % 100 == 0 {
                        match &e {
                            DecoderError::UnexpectedResolution { .. } => warn!("Assembler {}", e),
                            _ => warn!("Assembler decode error #{} ({} bytes): {}", failures, payload.len(), e),
                        }
                    }
                }
            }
        }

        info!("Assembler stopped after {} clouds ({} decode failures)", self.sequence, failures);
    }
}

// ── FpsLog ────────────────────────────────────────────────────────────────────

struct FpsLog {
    window_start: Instant,
    frames:       u32,
}

impl FpsLog {
    fn new(now: Instant) -> Self {
        Self { window_start: now, frames: 0 }
    }

    /// Count one cloud; returns the rate once per [`FPS_LOG_PERIOD`].
    fn tick(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < FPS_LOG_PERIOD {
            return None;
        }
        let fps = self.frames as f64 / elapsed.as_secs_f64();
        self.window_start = now;
        self.frames = 0;
        Some(fps)
    }
}
