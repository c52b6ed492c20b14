//! rigscope-transport: byte-level ingestion from the camera rig.
//!
//! # Architecture
//!
//! ```text
//! Rig (Pi)                                   This host
//! ──────────────────────────────────         ────────────────────────────────────────────
//! H.264 / MJPEG elementary streams ─ TCP ──► PersistentStreamReader → scanner → StreamRateTracker
//! depth images [u32 len][payload]  ─ TCP ──► DepthLink → FramedMessageReceiver → mpsc<Bytes>
//! IMU JSON datagrams               ─ UDP ──► ImuReceiver → watch<ImuSnapshot>
//! ```
//!
//! Every worker takes a `CancellationToken` and checks it after each read
//! or frame. Sockets are dropped by the task that owns them.

pub mod framed;
pub mod imu;
pub mod rate;
pub mod scanner;
pub mod stream_reader;

pub use framed::{DepthLink, FramedMessageReceiver};
pub use imu::{ImuReceiver, ImuSample, ImuSnapshot};
pub use rate::{RateMonitor, RateSnapshot, RollingRateWindow, StreamRateTracker};
pub use stream_reader::{PersistentStreamReader, ReaderConfig, ReaderExit};
