use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::types::{CameraIntrinsics, CodecKind, Resolution, StreamChannel};

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "RIGSCOPE_CONFIG";
/// Overrides [`RigConfig::host`].
pub const HOST_ENV: &str = "RIGSCOPE_HOST";
/// Overrides [`RigConfig::depth_port`].
pub const DEPTH_PORT_ENV: &str = "RIGSCOPE_DEPTH_PORT";

// MARK: - StreamSpec

/// One entry of the monitored port set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    pub id: u8,
    pub label: String,
    pub port: u16,
    pub codec: CodecKind,
}

impl StreamSpec {
    fn new(id: u8, label: &str, port: u16, codec: CodecKind) -> Self {
        Self { id, label: label.to_owned(), port, codec }
    }

    pub fn channel(&self) -> StreamChannel {
        StreamChannel::new(self.id, self.label.clone(), self.port, self.codec)
    }
}

// MARK: - DepthConfig

/// Intensity → metric distance mapping and reconstruction thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    /// Distance (m) of a 255 sample.
    pub near: f32,
    /// Distance (m) of a 0 sample.
    pub far: f32,
    /// Samples at or below this are "no return".
    #[serde(alias = "minIntensity")]
    pub min_intensity: u8,
    /// Frames with fewer valid points do not replace the published cloud.
    #[serde(alias = "minPoints")]
    pub min_points: usize,
    pub width: u32,
    pub height: u32,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            near: 0.5,
            far: 5.0,
            min_intensity: 15,
            min_points: 500,
            width: Resolution::DEPTH_NHD.width,
            height: Resolution::DEPTH_NHD.height,
        }
    }
}

impl DepthConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

// MARK: - ColorConfig

/// Coefficients of the depth/gradient → HSV mapping.
///
/// `hue = (1 - d) * hue_span`
/// `sat = sat_base + sat_gradient * g`
/// `val = value_base + value_depth * (1 - d) + value_gradient * g`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    #[serde(alias = "hueSpan")]
    pub hue_span: f32,
    #[serde(alias = "satBase")]
    pub sat_base: f32,
    #[serde(alias = "satGradient")]
    pub sat_gradient: f32,
    #[serde(alias = "valueBase")]
    pub value_base: f32,
    #[serde(alias = "valueDepth")]
    pub value_depth: f32,
    #[serde(alias = "valueGradient")]
    pub value_gradient: f32,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            hue_span: 240.0,
            sat_base: 0.7,
            sat_gradient: 0.3,
            value_base: 0.6,
            value_depth: 0.3,
            value_gradient: 0.1,
        }
    }
}

// MARK: - RigConfig

/// Everything the receiver needs to know about the camera rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Producer address (the Pi on the rig).
    pub host: String,
    pub streams: Vec<StreamSpec>,
    #[serde(alias = "depthPort")]
    pub depth_port: u16,
    #[serde(alias = "imuPort")]
    pub imu_port: u16,
    #[serde(alias = "imuEnabled")]
    pub imu_enabled: bool,
    pub intrinsics: CameraIntrinsics,
    pub depth: DepthConfig,
    pub color: ColorConfig,
    /// Number of per-second rate samples kept per stream.
    #[serde(alias = "rateWindow")]
    pub rate_window: usize,
    #[serde(alias = "connectTimeoutMs")]
    pub connect_timeout_ms: u64,
    #[serde(alias = "readTimeoutMs")]
    pub read_timeout_ms: u64,
    #[serde(alias = "maxDepthPayload")]
    pub max_depth_payload: usize,
    /// Delay before an idle stream reader is restarted; `None` leaves it idle.
    #[serde(alias = "restartDelayMs")]
    pub restart_delay_ms: Option<u64>,
    #[serde(alias = "linkInterfaces")]
    pub link_interfaces: Vec<String>,
    #[serde(alias = "linkPeriodMs")]
    pub link_period_ms: u64,
    #[serde(alias = "reportPeriodMs")]
    pub report_period_ms: u64,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.201".to_owned(),
            streams: vec![
                StreamSpec::new(0, "h264-rgb", 5000, CodecKind::Nal),
                StreamSpec::new(1, "h264-left", 5001, CodecKind::Nal),
                StreamSpec::new(2, "h264-right", 5002, CodecKind::Nal),
                StreamSpec::new(3, "mjpeg-preview", 5005, CodecKind::Marker),
            ],
            depth_port: 5003,
            imu_port: 5004,
            imu_enabled: true,
            intrinsics: CameraIntrinsics::default(),
            depth: DepthConfig::default(),
            color: ColorConfig::default(),
            rate_window: 10,
            connect_timeout_ms: 3_000,
            read_timeout_ms: 2_000,
            max_depth_payload: 8 * 1024 * 1024,
            restart_delay_ms: None,
            link_interfaces: vec!["eno2".to_owned(), "wlo1".to_owned()],
            link_period_ms: 2_000,
            report_period_ms: 1_000,
        }
    }
}

impl RigConfig {
    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loading config from {}", path.display());
        Self::from_json(&json)
    }

    /// Defaults → optional JSON file → environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => match std::env::var_os(CONFIG_ENV) {
                Some(p) => Self::from_file(p)?,
                None => Self::default(),
            },
        };
        cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Applies `RIGSCOPE_HOST` / `RIGSCOPE_DEPTH_PORT` from `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(HOST_ENV) {
            debug!("{} override: {}", HOST_ENV, host);
            self.host = host;
        }
        if let Some(port) = lookup(DEPTH_PORT_ENV) {
            self.depth_port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                reason: format!("{} is not a port: {:?}", DEPTH_PORT_ENV, port),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid { reason });

        if self.host.trim().is_empty() {
            return invalid("host is empty".into());
        }
        if self.streams.is_empty() {
            return invalid("no streams configured".into());
        }
        let mut ports = HashSet::new();
        for spec in &self.streams {
            if !ports.insert(spec.port) {
                return invalid(format!("port {} configured twice", spec.port));
            }
        }
        if ports.contains(&self.depth_port) {
            return invalid(format!("depth port {} collides with a stream port", self.depth_port));
        }
        let k = &self.intrinsics;
        if !(k.fx > 0.0 && k.fy > 0.0) {
            return invalid(format!("focal lengths must be positive (fx={}, fy={})", k.fx, k.fy));
        }
        if !(self.depth.near >= 0.0 && self.depth.near < self.depth.far) {
            return invalid(format!(
                "depth range must satisfy 0 <= near < far (near={}, far={})",
                self.depth.near, self.depth.far
            ));
        }
        if self.depth.width == 0 || self.depth.height == 0 {
            return invalid("depth resolution must be non-zero".into());
        }
        if self.rate_window == 0 {
            return invalid("rate_window must hold at least one sample".into());
        }
        if self.max_depth_payload == 0 {
            return invalid("max_depth_payload must be non-zero".into());
        }
        Ok(())
    }

    pub fn channels(&self) -> Vec<StreamChannel> {
        self.streams.iter().map(StreamSpec::channel).collect()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn restart_delay(&self) -> Option<Duration> {
        self.restart_delay_ms.map(Duration::from_millis)
    }
}
