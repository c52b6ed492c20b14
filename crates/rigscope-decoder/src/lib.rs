//! rigscope-decoder: depth payload → [`DepthFrame`].
//!
//! The rig encodes each depth image as a grayscale JPEG (PNG is accepted
//! too). The codec is opaque to the rest of the pipeline: anything that
//! implements [`DepthCodec`] can stand in, which is how the reconstruction
//! tests feed synthetic frames.
//!
//! # Pipeline
//! ```text
//! payload bytes → image::load_from_memory → to_luma8 → DepthFrame (row-major u8)
//! ```

use image::ImageFormat;
use rigscope_core::{errors::DecoderError, DepthFrame, Resolution};
use tracing::{debug, info};

// ── DepthCodec ────────────────────────────────────────────────────────────────

/// Turns one received payload into a depth grid.
pub trait DepthCodec: Send {
    fn decode(&mut self, payload: &[u8]) -> Result<DepthFrame, DecoderError>;

    fn name(&self) -> &str;
}

// ── ImageDepthCodec ───────────────────────────────────────────────────────────

/// JPEG/PNG decoder backed by the `image` crate.
pub struct ImageDepthCodec {
    expected: Option<Resolution>,
    decoded:  u64,
}

impl ImageDepthCodec {
    /// `expected` rejects frames whose size differs from the negotiated
    /// resolution; `None` accepts any size.
    pub fn new(expected: Option<Resolution>) -> Self {
        if let Some(res) = expected {
            info!("ImageDepthCodec ready, expecting {}", res);
        }
        Self { expected, decoded: 0 }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.decoded
    }
}

impl DepthCodec for ImageDepthCodec {
    fn decode(&mut self, payload: &[u8]) -> Result<DepthFrame, DecoderError> {
        let format = image::guess_format(payload).map_err(|e| DecoderError::DecodeFailed {
            reason: format!("unknown image format: {}", e),
        })?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
            return Err(DecoderError::DecodeFailed {
                reason: format!("unsupported depth format {:?}", format),
            });
        }

        let img = image::load_from_memory_with_format(payload, format)
            .map_err(|e| DecoderError::DecodeFailed { reason: e.to_string() })?
            .to_luma8();

        let actual = Resolution::new(img.width(), img.height());
        if let Some(expected) = self.expected {
            if actual != expected {
                return Err(DecoderError::UnexpectedResolution {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        let frame = DepthFrame::new(actual.width, actual.height, img.into_raw()).ok_or_else(|| {
            DecoderError::DecodeFailed { reason: "decoded buffer does not match dimensions".into() }
        })?;

        self.decoded += 1;
        debug!("Decoded depth {:?} {} ({} bytes in)", format, actual, payload.len());
        Ok(frame)
    }

    fn name(&self) -> &str {
        "image"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::io::Cursor;

    fn encode(img: &GrayImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, _| Luma([(x * 255 / (width - 1)) as u8]))
    }

    #[test]
    fn png_round_trips_exactly() {
        let img = gradient(16, 9);
        let mut codec = ImageDepthCodec::new(Some(Resolution::new(16, 9)));
        let frame = codec.decode(&encode(&img, ImageFormat::Png)).unwrap();
        assert_eq!(frame.samples(), img.as_raw().as_slice());
        assert_eq!(codec.frames_decoded(), 1);
    }

    #[test]
    fn jpeg_decodes_to_expected_size() {
        let img = gradient(64, 36);
        let mut codec = ImageDepthCodec::new(None);
        let frame = codec.decode(&encode(&img, ImageFormat::Jpeg)).unwrap();
        assert_eq!(frame.resolution(), Resolution::new(64, 36));
        // Lossy, but the ramp survives.
        assert!(frame.sample(0, 0) < 40);
        assert!(frame.sample(63, 0) > 215);
    }

    #[test]
    fn resolution_mismatch_is_rejected() {
        let mut codec = ImageDepthCodec::new(Some(Resolution::DEPTH_NHD));
        let res = codec.decode(&encode(&gradient(8, 8), ImageFormat::Png));
        assert!(matches!(res, Err(DecoderError::UnexpectedResolution { .. })));
        assert_eq!(codec.frames_decoded(), 0);
    }

    #[test]
    fn garbage_is_decode_failure() {
        let mut codec = ImageDepthCodec::new(None);
        assert!(matches!(codec.decode(b"\x00\x01garbage"), Err(DecoderError::DecodeFailed { .. })));
        // Valid JPEG signature, truncated body.
        assert!(matches!(
            codec.decode(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]),
            Err(DecoderError::DecodeFailed { .. })
        ));
    }
}
