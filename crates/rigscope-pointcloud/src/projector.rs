use rigscope_core::{CameraIntrinsics, DepthConfig, DepthFrame};

/// Pinhole deprojection of an intensity-encoded depth image.
///
/// Intensity maps linearly and inversely onto distance:
/// `z = far - (sample / 255) * (far - near)`, so 255 sits at `near` and 0
/// at `far`. Samples at or below `min_intensity` carry no return.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthProjector {
    intrinsics:    CameraIntrinsics,
    near:          f32,
    far:           f32,
    min_intensity: u8,
}

impl DepthProjector {
    pub fn new(intrinsics: CameraIntrinsics, depth: &DepthConfig) -> Self {
        Self {
            intrinsics,
            near: depth.near,
            far: depth.far,
            min_intensity: depth.min_intensity,
        }
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    #[inline]
    pub fn is_valid(&self, sample: u8) -> bool {
        sample > self.min_intensity
    }

    /// Metric distance of a sample, in meters.
    #[inline]
    pub fn distance(&self, sample: u8) -> f32 {
        let normalized = sample as f32 / 255.0;
        self.far - normalized * (self.far - self.near)
    }

    #[inline]
    pub fn deproject(&self, px: u32, py: u32, z: f32) -> [f32; 3] {
        let k = &self.intrinsics;
        let x = (px as f32 - k.cx) * z / k.fx;
        let y = (py as f32 - k.cy) * z / k.fy;
        [x, y, z]
    }

    /// One point per valid pixel, row-major.
    pub fn project(&self, frame: &DepthFrame) -> Vec<[f32; 3]> {
        let width = frame.width();
        let mut points = Vec::new();
        for (i, &sample) in frame.samples().iter().enumerate() {
            if !self.is_valid(sample) {
                continue;
            }
            let px = i as u32 % width;
            let py = i as u32 / width;
            points.push(self.deproject(px, py, self.distance(sample)));
        }
        points
    }

    /// Valid pixel count without building the points.
    pub fn count_valid(&self, frame: &DepthFrame) -> usize {
        frame.samples().iter().filter(|&&s| self.is_valid(s)).count()
    }
}
