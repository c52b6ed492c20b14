use thiserror::Error;

#[derive(Error, Debug)]
pub enum RigError {
    #[error("Configuration invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),

    #[error("Link metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("IMU error: {0}")]
    Imu(#[from] ImuError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a raw elementary-stream connection.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("No data within {ms}ms")]
    StreamTimeout { ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the length-prefixed depth channel.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Connection closed inside the 4-byte length header")]
    IncompleteHeader,

    #[error("Connection closed after {received} of {expected} payload bytes")]
    IncompleteBody { expected: usize, received: usize },

    #[error("Declared payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Producer stalled, no bytes within {ms}ms")]
    Timeout { ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True when the peer went away mid-frame and a reconnect is the remedy.
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::IncompleteHeader | Self::IncompleteBody { .. })
    }
}

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Failed to decode depth payload: {reason}")]
    DecodeFailed { reason: String },

    #[error("Depth image is {actual}, expected {expected}")]
    UnexpectedResolution { expected: String, actual: String },
}

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Malformed counters for {iface}: {reason}")]
    MalformedMetrics { iface: String, reason: String },

    #[error("Interface {0} not present in counter source")]
    UnknownInterface(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{reason}")]
    Invalid { reason: String },
}

#[derive(Error, Debug)]
pub enum ImuError {
    #[error("No IMU_ACK within {ms}ms")]
    RegistrationTimeout { ms: u64 },

    #[error("Unexpected registration reply ({len} bytes)")]
    UnexpectedAck { len: usize },

    #[error("Malformed IMU datagram: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
