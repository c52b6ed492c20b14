//! IMU feed over UDP.
//!
//! # Handshake
//!
//! ```text
//! receiver ── "REGISTER_IMU" ──► rig:5004
//! receiver ◄── "IMU_ACK" ─────── rig:5004      (within 1 s)
//! receiver ◄── {json sample} ─── rig:5004      (repeated)
//! ```
//!
//! Each datagram is one JSON object:
//! `{"timestamp": 12.5, "accelerometer": {"x":..,"y":..,"z":..}, "gyroscope": {..}}`

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rigscope_core::ImuError;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const REGISTER_MESSAGE: &[u8] = b"REGISTER_IMU";
pub const ACK_MESSAGE: &[u8] = b"IMU_ACK";
pub const ACK_TIMEOUT: Duration = Duration::from_secs(1);
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);
/// Data older than this marks the feed stale.
pub const STALE_AFTER: Duration = Duration::from_secs(2);
pub const HISTORY_LEN: usize = 100;
const MAX_DATAGRAM: usize = 4096;

// MARK: - ImuSample

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// One accelerometer (m/s²) + gyroscope (rad/s) reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuSample {
    /// Producer clock, seconds.
    pub timestamp: f64,
    pub accelerometer: Vector3,
    pub gyroscope: Vector3,
}

impl ImuSample {
    pub fn parse(datagram: &[u8]) -> Result<Self, ImuError> {
        Ok(serde_json::from_slice(datagram)?)
    }
}

// MARK: - ImuStats

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuSnapshot {
    pub packets: u64,
    pub rate_hz: f64,
    pub last: Option<ImuSample>,
    pub stale: bool,
}

#[derive(Debug)]
pub struct ImuStats {
    packets:     u64,
    started:     Instant,
    last_update: Option<Instant>,
    history:     VecDeque<ImuSample>,
}

impl ImuStats {
    pub fn new(started: Instant) -> Self {
        Self { packets: 0, started, last_update: None, history: VecDeque::with_capacity(HISTORY_LEN) }
    }

    pub fn record(&mut self, sample: ImuSample, now: Instant) {
        self.packets += 1;
        self.last_update = Some(now);
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    pub fn history(&self) -> &VecDeque<ImuSample> {
        &self.history
    }

    pub fn snapshot(&self, now: Instant) -> ImuSnapshot {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        ImuSnapshot {
            packets: self.packets,
            rate_hz: if elapsed > 0.0 { self.packets as f64 / elapsed } else { 0.0 },
            last: self.history.back().copied(),
            stale: self
                .last_update
                .map_or(false, |t| now.saturating_duration_since(t) > STALE_AFTER),
        }
    }
}

// MARK: - ImuReceiver

pub struct ImuReceiver {
    socket: UdpSocket,
    peer:   SocketAddr,
}

impl ImuReceiver {
    /// Bind an ephemeral port and register with the rig.
    pub async fn register(host: &str, port: u16) -> Result<Self, ImuError> {
        Self::register_with_timeout(host, port, ACK_TIMEOUT).await
    }

    pub async fn register_with_timeout(
        host: &str,
        port: u16,
        ack_timeout: Duration,
    ) -> Result<Self, ImuError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((host, port)).await?;
        let peer = socket.peer_addr()?;

        info!("IMU registering with {}", peer);
        socket.send(REGISTER_MESSAGE).await?;

        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(ack_timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ImuError::RegistrationTimeout { ms: ack_timeout.as_millis() as u64 })??;
        if &buf[..n] != ACK_MESSAGE {
            return Err(ImuError::UnexpectedAck { len: n });
        }

        info!("IMU registered with {}", peer);
        Ok(Self { socket, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Receive samples until cancelled, publishing a snapshot per datagram
    /// and per quiet second.
    pub async fn run(self, snapshots: watch::Sender<ImuSnapshot>, cancel: CancellationToken) {
        let mut stats = ImuStats::new(Instant::now());
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = tokio::time::timeout(RECV_TIMEOUT, self.socket.recv(&mut buf)) => res,
            };

            match res {
                Ok(Ok(n)) => match ImuSample::parse(&buf[..n]) {
                    Ok(sample) => stats.record(sample, Instant::now()),
                    Err(e) => warn!("IMU {}", e),
                },
                Ok(Err(e)) => {
                    warn!("IMU receive error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(_) => debug!("IMU no datagram within {}ms", RECV_TIMEOUT.as_millis()),
            }

            snapshots.send_replace(stats.snapshot(Instant::now()));
        }

        info!("IMU receiver stopped after {} packets", stats.packets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sample_with_missing_axes() {
        let json = br#"{"timestamp": 1.25, "accelerometer": {"x": 3.0, "y": 4.0}, "gyroscope": {}}"#;
        let s = ImuSample::parse(json).unwrap();
        assert_eq!(s.timestamp, 1.25);
        assert_eq!(s.accelerometer.magnitude(), 5.0);
        assert_eq!(s.gyroscope, Vector3::default());
        assert!(matches!(ImuSample::parse(b"not json"), Err(ImuError::Malformed(_))));
    }

    #[test]
    fn stats_track_rate_history_and_staleness() {
        let t0 = Instant::now();
        let mut stats = ImuStats::new(t0);
        for i in 0..150u32 {
            stats.record(ImuSample::default(), t0 + Duration::from_millis(10 * i as u64));
        }
        assert_eq!(stats.history().len(), HISTORY_LEN);

        let snap = stats.snapshot(t0 + Duration::from_secs(1));
        assert_eq!(snap.packets, 150);
        assert!((snap.rate_hz - 150.0).abs() < 1e-9);
        assert!(!snap.stale);
        assert!(stats.snapshot(t0 + Duration::from_secs(5)).stale);
    }

    #[tokio::test]
    async fn registers_and_receives_samples() {
        let rig = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = rig.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, from) = rig.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], REGISTER_MESSAGE);
            rig.send_to(ACK_MESSAGE, from).await.unwrap();
            for i in 0..3 {
                let json = format!(r#"{{"timestamp": {i}, "accelerometer": {{"z": 9.81}}}}"#);
                rig.send_to(json.as_bytes(), from).await.unwrap();
            }
            rig.send_to(b"{broken", from).await.unwrap();
        });

        let imu = ImuReceiver::register("127.0.0.1", port).await.unwrap();
        let (tx, mut rx) = watch::channel(ImuSnapshot::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(imu.run(tx, cancel.clone()));

        let snap = loop {
            rx.changed().await.unwrap();
            let snap = *rx.borrow();
            if snap.packets == 3 {
                break snap;
            }
        };
        assert_eq!(snap.last.unwrap().accelerometer.z, 9.81);

        cancel.cancel();
        task.await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn silent_rig_times_out_registration() {
        let rig = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = rig.local_addr().unwrap().port();
        let res = ImuReceiver::register_with_timeout("127.0.0.1", port, Duration::from_millis(100)).await;
        assert!(matches!(res, Err(ImuError::RegistrationTimeout { .. })));
    }
}
