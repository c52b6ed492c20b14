pub mod config;
pub mod errors;
pub mod link_stats;
pub mod types;

pub use config::{ColorConfig, DepthConfig, RigConfig, StreamSpec};
pub use errors::{
    ConfigError, DecoderError, FrameError, ImuError, MetricsError, RigError, StreamError,
};
pub use link_stats::{LinkActivity, LinkCounters, LinkRates, LinkSampler};
pub use types::*;
