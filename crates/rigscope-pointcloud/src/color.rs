//! Depth + surface-gradient coloring.
//!
//! Hue carries distance (near red, far blue); saturation and brightness
//! get a boost on edges so surface structure stays readable. The
//! coefficients are a presentation choice and come from [`ColorConfig`].

use rigscope_core::{ColorConfig, DepthFrame};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsv {
    /// Degrees, `[0, 360)`.
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

impl Hsv {
    pub fn to_rgb(self) -> [f32; 3] {
        hsv_to_rgb(self.h, self.s, self.v)
    }
}

/// HSV → RGB, all channels in `[0, 1]`.
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let h = h.rem_euclid(360.0) / 60.0;
    let c = v * s;
    let x = c * (1.0 - ((h % 2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    [r + m, g + m, b + m]
}

/// Sobel gradient magnitude normalized by the frame maximum.
///
/// Borders reflect without repeating the edge sample (`dcb|abcd|cba`).
/// A frame with no gradient at all yields zeros.
pub fn gradient_magnitude(frame: &DepthFrame) -> Vec<f32> {
    let w = frame.width() as i64;
    let h = frame.height() as i64;
    let data = frame.samples();
    let at = |x: i64, y: i64| -> f32 {
        let x = reflect_101(x, w);
        let y = reflect_101(y, h);
        data[y * w as usize + x] as f32
    };

    let mut mags = Vec::with_capacity(data.len());
    let mut max = 0.0f32;
    for y in 0..h {
        for x in 0..w {
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            let mag = (gx * gx + gy * gy).sqrt();
            max = max.max(mag);
            mags.push(mag);
        }
    }

    if max > 0.0 {
        for m in &mut mags {
            *m = (*m / max).clamp(0.0, 1.0);
        }
    } else {
        mags.iter_mut().for_each(|m| *m = 0.0);
    }
    mags
}

fn reflect_101(i: i64, n: i64) -> usize {
    if n == 1 {
        return 0;
    }
    let r = if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    };
    r as usize
}

// ── SurfaceColorMapper ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceColorMapper {
    coeffs: ColorConfig,
}

impl Default for SurfaceColorMapper {
    fn default() -> Self {
        Self::new(ColorConfig::default())
    }
}

impl SurfaceColorMapper {
    pub fn new(coeffs: ColorConfig) -> Self {
        Self { coeffs }
    }

    /// HSV of one pixel from its normalized depth sample and gradient.
    pub fn hsv(&self, depth_norm: f32, gradient_norm: f32) -> Hsv {
        let c = &self.coeffs;
        let nearness = 1.0 - depth_norm;
        Hsv {
            h: nearness * c.hue_span,
            s: (c.sat_base + c.sat_gradient * gradient_norm).clamp(0.0, 1.0),
            v: (c.value_base + c.value_depth * nearness + c.value_gradient * gradient_norm).clamp(0.0, 1.0),
        }
    }

    /// HSV per valid pixel, row-major, using `valid` as the mask.
    pub fn shade(&self, frame: &DepthFrame, valid: impl Fn(u8) -> bool) -> Vec<Hsv> {
        let gradients = gradient_magnitude(frame);
        frame
            .samples()
            .iter()
            .zip(gradients)
            .filter(|(&s, _)| valid(s))
            .map(|(&s, g)| self.hsv(s as f32 / 255.0, g))
            .collect()
    }

    /// RGB per valid pixel, row-major.
    pub fn colorize(&self, frame: &DepthFrame, valid: impl Fn(u8) -> bool) -> Vec<[f32; 3]> {
        self.shade(frame, valid).into_iter().map(Hsv::to_rgb).collect()
    }
}
