//! Frame-boundary heuristics for unwrapped elementary streams.
//!
//! The monitored ports carry raw codec output with no length header, so a
//! frame is counted every time the codec's start marker shows up. Nothing
//! between two markers is validated.
//!
//! ```text
//! NAL (Annex B):  .. 00 00 00 01 | 65 88 84 .. 00 00 01 | 41 9a ..
//!                    ^^^^^^^^^^^ 1                ^^^^^^^^ 2
//! Marker (MJPEG): .. FF D8 | FF E0 .. FF D9 FF D8 | ..
//!                    ^^^^^ 1                ^^^^^ 2
//! ```
//!
//! A marker split across two reads is found once the second read extends
//! the buffer. Trimming in the stream reader can still drop a marker that
//! straddles the trim point; that loss is accepted in exchange for bounded
//! latency.

use bytes::{Buf, BytesMut};
use rigscope_core::CodecKind;

pub const NAL_START_CODE_LONG: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
pub const NAL_START_CODE_SHORT: [u8; 3] = [0x00, 0x00, 0x01];
/// JPEG start-of-image.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Location of one marker inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub offset: usize,
    pub len: usize,
}

impl Boundary {
    /// First byte after the marker.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Earliest marker of `codec` in `buf`, if any.
pub fn find_boundary(buf: &[u8], codec: CodecKind) -> Option<Boundary> {
    match codec {
        CodecKind::Nal => find_start_code(buf),
        CodecKind::Marker => find_pattern(buf, &JPEG_SOI).map(|offset| Boundary {
            offset,
            len: JPEG_SOI.len(),
        }),
    }
}

/// Counts and consumes every marker in `buf`.
///
/// Bytes up to and including the last matched marker are removed; anything
/// after it stays so a marker completed by the next read is still found.
pub fn scan(buf: &mut BytesMut, codec: CodecKind) -> usize {
    let mut frames = 0;
    while let Some(boundary) = find_boundary(buf, codec) {
        buf.advance(boundary.end());
        frames += 1;
    }
    frames
}

/// Every `00 00 00 01` contains `00 00 01`, so searching for the short form
/// and looking one byte back finds the long form without ever skipping an
/// earlier short code.
fn find_start_code(buf: &[u8]) -> Option<Boundary> {
    let i = find_pattern(buf, &NAL_START_CODE_SHORT)?;
    if i > 0 && buf[i - 1] == 0x00 {
        Some(Boundary { offset: i - 1, len: NAL_START_CODE_LONG.len() })
    } else {
        Some(Boundary { offset: i, len: NAL_START_CODE_SHORT.len() })
    }
}

fn find_pattern(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
