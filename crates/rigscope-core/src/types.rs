use serde::{Deserialize, Serialize};

// MARK: - Resolution

/// Negotiated image resolution of the depth channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Depth resolution used by the rig in the field.
    pub const DEPTH_NHD: Self = Self { width: 640, height: 360 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn total_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// MARK: - CodecKind

/// How frame boundaries are marked inside a raw elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// H.264-family Annex B stream, units prefixed by `00 00 01` / `00 00 00 01`.
    #[serde(alias = "h264", alias = "h265")]
    Nal,
    /// Single-marker codec (MJPEG), every frame opens with `FF D8`.
    #[serde(alias = "mjpeg", alias = "jpeg")]
    Marker,
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nal => write!(f, "NAL"),
            Self::Marker => write!(f, "marker"),
        }
    }
}

// MARK: - ChannelState

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    #[default]
    Disconnected,
    Connecting,
    Active,
    Idle,
}

impl ChannelState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting   => "connecting",
            Self::Active       => "active",
            Self::Idle         => "idle",
        }
    }
}

// MARK: - StreamChannel

/// One monitored producer port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChannel {
    pub id: u8,
    pub label: String,
    pub port: u16,
    pub codec: CodecKind,
    #[serde(skip)]
    pub state: ChannelState,
}

impl StreamChannel {
    pub fn new(id: u8, label: impl Into<String>, port: u16, codec: CodecKind) -> Self {
        Self {
            id,
            label: label.into(),
            port,
            codec,
            state: ChannelState::Disconnected,
        }
    }

    pub fn socket_addr(&self, host: &str) -> String {
        format!("{}:{}", host, self.port)
    }
}

// MARK: - CameraIntrinsics

/// Pinhole model constants of the depth sensor (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Default for CameraIntrinsics {
    /// Estimate for the 640×360 depth output.
    fn default() -> Self {
        Self { fx: 400.0, fy: 400.0, cx: 320.0, cy: 180.0 }
    }
}

// MARK: - DepthFrame

/// Decoded 8-bit depth image, row-major.
///
/// Brighter samples are nearer; `0` means no return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl DepthFrame {
    /// Returns `None` unless `data` holds exactly `width * height` samples.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() as u64 != width as u64 * height as u64 {
            return None;
        }
        Some(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn samples(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn sample(&self, x: u32, y: u32) -> u8 {
        self.data[(y as usize) * (self.width as usize) + x as usize]
    }
}
