//! Long-lived reader for one raw elementary-stream port.
//!
//! ```text
//! TcpStream ──8 KiB reads──► buffer ──scan──► StreamRateTracker ──watch──► RateMonitor
//!                              │
//!                              └─ > 16 KiB: keep trailing 8 KiB
//! ```
//!
//! Reads are issued back to back with no delay so the reader keeps pace
//! with the producer. The buffer trim is lossy on purpose: a marker that
//! straddles the cut is not counted, but memory and scan cost stay bounded
//! under bursts.

use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use rigscope_core::{ChannelState, StreamChannel, StreamError};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rate::{RateMonitor, StreamRateTracker};
use crate::scanner;

/// Bytes requested per socket read.
pub const CHUNK_SIZE: usize = 8 * 1024;
/// Buffer length that triggers a trim.
pub const BUFFER_HIGH_WATER: usize = 16 * 1024;
/// Bytes kept after a trim.
pub const BUFFER_RETAIN: usize = 8 * 1024;

/// Why a [`PersistentStreamReader::run`] returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    Cancelled,
    /// Read timeout before the producer ever sent a byte.
    Inactive,
    PeerClosed,
}

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub host:            String,
    pub connect_timeout: Duration,
    pub read_timeout:    Duration,
    pub window_capacity: usize,
}

// ── PersistentStreamReader ────────────────────────────────────────────────────

pub struct PersistentStreamReader {
    channel:  StreamChannel,
    config:   ReaderConfig,
    tracker:  StreamRateTracker,
    buffer:   BytesMut,
    trimmed:  u64,
}

impl PersistentStreamReader {
    pub fn new(channel: StreamChannel, config: ReaderConfig) -> Self {
        let tracker = StreamRateTracker::new(config.window_capacity);
        Self {
            channel,
            config,
            tracker,
            buffer: BytesMut::with_capacity(BUFFER_HIGH_WATER + CHUNK_SIZE),
            trimmed: 0,
        }
    }

    pub fn channel(&self) -> &StreamChannel {
        &self.channel
    }

    /// Rate snapshots for the reporting side; stays valid across restarts.
    pub fn monitor(&self) -> RateMonitor {
        self.tracker.monitor()
    }

    /// Number of buffer trims performed so far.
    pub fn trims(&self) -> u64 {
        self.trimmed
    }

    /// Connect and consume the stream until it goes quiet, closes, or
    /// `cancel` fires.
    ///
    /// A failed connect leaves the channel idle and is reported as
    /// [`StreamError::ConnectFailed`]; there is no retry here. Calling `run`
    /// again on the same reader reconnects and keeps the accumulated totals.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<ReaderExit, StreamError> {
        let addr = self.channel.socket_addr(&self.config.host);
        let label = self.channel.label.clone();

        self.set_state(ChannelState::Connecting);
        self.buffer.clear();
        self.tracker.restart_period();

        let stream = tokio::select! {
            _ = cancel.cancelled() => {
                self.set_state(ChannelState::Disconnected);
                return Ok(ReaderExit::Cancelled);
            }
            res = connect(&addr, self.config.connect_timeout) => res,
        };
        let mut stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!("Stream[{}] {}", label, e);
                self.go_idle(Instant::now());
                return Err(e);
            }
        };
        info!("Stream[{}] connected to {} ({} codec)", label, addr, self.channel.codec);

        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut seen_bytes = false;

        let exit = loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(ReaderExit::Cancelled),
                r = read_chunk(&mut stream, &mut chunk, self.config.read_timeout) => r,
            };

            match read {
                Ok(0) => {
                    info!("Stream[{}] closed by peer", label);
                    break Ok(ReaderExit::PeerClosed);
                }
                Ok(n) => {
                    if !seen_bytes {
                        seen_bytes = true;
                        debug!("Stream[{}] first {} bytes", label, n);
                    }
                    self.set_state(ChannelState::Active);
                    self.ingest(&chunk[..n], Instant::now());
                }
                Err(StreamError::StreamTimeout { ms }) if !seen_bytes => {
                    info!("Stream[{}] no data within {}ms, stream not currently active", label, ms);
                    break Ok(ReaderExit::Inactive);
                }
                Err(StreamError::StreamTimeout { ms }) => {
                    if self.tracker.snapshot().state.is_active() {
                        debug!("Stream[{}] quiet for {}ms", label, ms);
                    }
                    self.go_idle(Instant::now());
                }
                Err(e) => {
                    warn!("Stream[{}] read failed: {}", label, e);
                    break Err(e);
                }
            }
        };

        // Socket closes here, on the task that owns it.
        drop(stream);
        self.go_idle(Instant::now());
        if let Ok(ReaderExit::Cancelled) = exit {
            self.set_state(ChannelState::Disconnected);
        }
        exit
    }

    /// Feed one received chunk: scan for boundaries, account, trim.
    ///
    /// Returns the number of frame boundaries found.
    pub fn ingest(&mut self, bytes: &[u8], now: Instant) -> usize {
        self.buffer.extend_from_slice(bytes);
        let frames = scanner::scan(&mut self.buffer, self.channel.codec);
        self.tracker.record_chunk(bytes.len(), frames, now);

        if self.buffer.len() > BUFFER_HIGH_WATER {
            let drop_len = self.buffer.len() - BUFFER_RETAIN;
            self.buffer.advance(drop_len);
            self.trimmed += 1;
        }
        frames
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn set_state(&mut self, state: ChannelState) {
        self.channel.state = state;
        self.tracker.set_state(state);
    }

    /// Idle with a zero live rate; see [`StreamRateTracker::mark_idle`].
    fn go_idle(&mut self, now: Instant) {
        self.channel.state = ChannelState::Idle;
        self.tracker.mark_idle(now);
    }
}

async fn connect(addr: &str, limit: Duration) -> Result<TcpStream, StreamError> {
    let failed = |reason: String| StreamError::ConnectFailed { addr: addr.to_owned(), reason };
    let stream = tokio::time::timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| failed(format!("timed out after {}ms", limit.as_millis())))?
        .map_err(|e| failed(e.to_string()))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn read_chunk(
    stream: &mut TcpStream,
    chunk: &mut [u8],
    limit: Duration,
) -> Result<usize, StreamError> {
    match tokio::time::timeout(limit, stream.read(chunk)).await {
        Ok(res) => Ok(res?),
        Err(_) => Err(StreamError::StreamTimeout { ms: limit.as_millis() as u64 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigscope_core::CodecKind;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn reader(codec: CodecKind, port: u16, read_timeout: Duration) -> PersistentStreamReader {
        PersistentStreamReader::new(
            StreamChannel::new(0, "test", port, codec),
            ReaderConfig {
                host: "127.0.0.1".into(),
                connect_timeout: Duration::from_millis(500),
                read_timeout,
                window_capacity: 5,
            },
        )
    }

    #[test]
    fn buffer_is_trimmed_to_retained_tail() {
        let mut r = reader(CodecKind::Nal, 0, Duration::from_secs(1));
        let now = Instant::now();
        let noise = vec![0xAB; CHUNK_SIZE];
        r.ingest(&noise, now);
        r.ingest(&noise, now);
        assert_eq!(r.buffered(), 2 * CHUNK_SIZE);
        assert_eq!(r.trims(), 0);

        r.ingest(&[0xAB; 10], now);
        assert_eq!(r.buffered(), BUFFER_RETAIN);
        assert_eq!(r.trims(), 1);
    }

    #[test]
    fn ingest_counts_frames_and_bytes() {
        let mut r = reader(CodecKind::Nal, 0, Duration::from_secs(1));
        let monitor = r.monitor();
        let frames = r.ingest(&[0, 0, 0, 1, 0x65, 0, 0, 1, 0x41], Instant::now());
        assert_eq!(frames, 2);
        let snap = monitor.latest_snapshot();
        assert_eq!(snap.total_frames, 2);
        assert_eq!(snap.total_bytes, 9);
    }

    #[tokio::test]
    async fn connect_failure_marks_channel_idle() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let mut r = reader(CodecKind::Nal, port, Duration::from_millis(200));
        let res = r.run(&CancellationToken::new()).await;
        assert!(matches!(res, Err(StreamError::ConnectFailed { .. })));
        assert_eq!(r.channel().state, ChannelState::Idle);
        assert_eq!(r.monitor().latest_snapshot().state, ChannelState::Idle);
    }

    #[tokio::test]
    async fn silent_producer_ends_loop_as_inactive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(sock);
        });

        let mut r = reader(CodecKind::Nal, port, Duration::from_millis(100));
        let res = r.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(res, ReaderExit::Inactive);
        assert_eq!(r.channel().state, ChannelState::Idle);
        server.abort();
    }

    #[tokio::test]
    async fn peer_close_ends_loop_and_keeps_counts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            for _ in 0..5 {
                sock.write_all(&[0, 0, 0, 1, 0x65, 0x88]).await.unwrap();
            }
            sock.shutdown().await.unwrap();
        });

        let mut r = reader(CodecKind::Nal, port, Duration::from_secs(2));
        let res = r.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(res, ReaderExit::PeerClosed);
        let snap = r.monitor().latest_snapshot();
        assert_eq!(snap.total_frames, 5);
        assert_eq!(snap.total_bytes, 30);
        assert_eq!(snap.state, ChannelState::Idle);
    }

    #[tokio::test]
    async fn quiet_producer_reports_zero_rate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.set_nodelay(true).unwrap();
            let mut ticker = tokio::time::interval(Duration::from_secs(1) / 30);
            for _ in 0..40 {
                ticker.tick().await;
                sock.write_all(&[0, 0, 0, 1, 0x41, 0x9a]).await.unwrap();
            }
            // Silent, socket held open.
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut r = reader(CodecKind::Nal, port, Duration::from_millis(200));
        let monitor = r.monitor();
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let checker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2000)).await;
            let snap = monitor.latest_snapshot();
            stopper.cancel();
            snap
        });

        let res = r.run(&cancel).await.unwrap();
        let snap = checker.await.unwrap();
        assert_eq!(res, ReaderExit::Cancelled);
        assert_eq!(snap.total_frames, 40);
        assert!(snap.samples >= 1);
        assert_eq!(snap.state, ChannelState::Idle);
        assert_eq!(snap.current_fps, 0.0);
        assert_eq!(snap.bandwidth_mbps, 0.0);
        server.abort();
    }

    #[tokio::test]
    async fn cancellation_stops_active_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            loop {
                if sock.write_all(&[0xFF, 0xD8, 0x00]).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });

        let mut r = reader(CodecKind::Marker, port, Duration::from_secs(5));
        let res = r.run(&cancel).await.unwrap();
        assert_eq!(res, ReaderExit::Cancelled);
        assert!(r.monitor().latest_snapshot().total_frames > 0);
        assert_eq!(r.channel().state, ChannelState::Disconnected);
        server.abort();
    }
}
