//! Length-prefixed depth channel.
//!
//! # Wire format
//!
//! ```text
//! [0..4]   len      u32 BE  payload length
//! [4..]    payload  [u8]    one encoded depth image (JPEG/PNG)
//! ```
//!
//! Repeated for as long as the connection lives. No sequence numbers and
//! no channel id: one connection carries exactly one depth stream.

use std::time::Duration;

use bytes::Bytes;
use rigscope_core::FrameError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Pause between reconnect attempts of the depth link.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

// ── FramedMessageReceiver ─────────────────────────────────────────────────────

/// Reads `[len][payload]` frames from any byte stream.
///
/// A payload is only returned once all `len` bytes arrived; partial data is
/// dropped together with the error. With a read timeout set, every single
/// read is bounded and a stalled producer surfaces as [`FrameError::Timeout`].
pub struct FramedMessageReceiver<R> {
    reader:       R,
    max_payload:  usize,
    read_timeout: Option<Duration>,
    received:     u64,
}

impl<R: AsyncRead + Unpin> FramedMessageReceiver<R> {
    pub fn new(reader: R, max_payload: usize) -> Self {
        Self { reader, max_payload, read_timeout: None, received: 0 }
    }

    pub fn with_read_timeout(mut self, limit: Duration) -> Self {
        self.read_timeout = Some(limit);
        self
    }

    /// Frames successfully received so far.
    pub fn frames_received(&self) -> u64 {
        self.received
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    pub async fn receive_one(&mut self) -> Result<Bytes, FrameError> {
        let mut header = [0u8; LENGTH_PREFIX_SIZE];
        let got = read_full(&mut self.reader, &mut header, self.read_timeout).await?;
        if got < LENGTH_PREFIX_SIZE {
            return Err(FrameError::IncompleteHeader);
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_payload {
            return Err(FrameError::PayloadTooLarge { len, max: self.max_payload });
        }

        let mut payload = vec![0u8; len];
        let got = read_full(&mut self.reader, &mut payload, self.read_timeout).await?;
        if got < len {
            return Err(FrameError::IncompleteBody { expected: len, received: got });
        }

        self.received += 1;
        Ok(Bytes::from(payload))
    }
}

/// Fill `buf` across as many reads as needed; returns fewer bytes only on EOF.
async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    limit: Option<Duration>,
) -> Result<usize, FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]);
        let n = match limit {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| FrameError::Timeout { ms: limit.as_millis() as u64 })??,
            None => read.await?,
        };
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ── DepthLink ─────────────────────────────────────────────────────────────────

/// Connection settings of the depth producer.
#[derive(Debug, Clone)]
pub struct DepthLink {
    pub host:            String,
    pub port:            u16,
    pub connect_timeout: Duration,
    /// Longest wait for any single read before the link is recycled.
    pub read_timeout:    Duration,
    pub max_payload:     usize,
}

impl DepthLink {
    pub async fn connect(&self) -> Result<FramedMessageReceiver<TcpStream>, FrameError> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(FrameError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                )))
            }
        };
        stream.set_nodelay(true)?;
        info!("Depth[{}] connected to {}", self.port, addr);
        Ok(FramedMessageReceiver::new(stream, self.max_payload).with_read_timeout(self.read_timeout))
    }

    /// Receive payloads into `tx` until cancelled, reconnecting after every
    /// connection loss.
    ///
    /// Payloads are offered with `try_send`: when reconstruction lags, the
    /// newest payload is dropped rather than stalling the socket.
    pub async fn run(self, tx: mpsc::Sender<Bytes>, cancel: CancellationToken) {
        let mut dropped: u64 = 0;

        'reconnect: while !cancel.is_cancelled() {
            let mut receiver = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.connect() => match res {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Depth[{}] connect failed: {}", self.port, e);
                        if pause(&cancel).await { break; }
                        continue;
                    }
                },
            };

            loop {
                let res = tokio::select! {
                    _ = cancel.cancelled() => break 'reconnect,
                    res = receiver.receive_one() => res,
                };

                match res {
                    Ok(payload) => {
                        debug!("Depth[{}] payload {} bytes", self.port, payload.len());
                        match tx.try_send(payload) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                dropped += 1;
                                if dropped % 30 == 1 {
                                    debug!("Depth[{}] assembler busy, {} payloads dropped", self.port, dropped);
                                }
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                info!("Depth[{}] consumer gone, stopping", self.port);
                                break 'reconnect;
                            }
                        }
                    }
                    Err(e) if e.is_truncation() => {
                        warn!(
                            "Depth[{}] {} after {} frames, reconnecting",
                            self.port, e, receiver.frames_received()
                        );
                        break;
                    }
                    Err(e) => {
                        warn!("Depth[{}] {}, reconnecting", self.port, e);
                        break;
                    }
                }
            }

            if pause(&cancel).await {
                break;
            }
        }

        info!("Depth[{}] receiver stopped", self.port);
    }
}

/// Sleep for [`RECONNECT_DELAY`]; true when cancelled meanwhile.
async fn pause(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(RECONNECT_DELAY) => false,
    }
}
