//! Loopback producers exercising the transport crate end to end.

use std::time::Duration;

use rigscope_core::{ChannelState, CodecKind, StreamChannel};
use rigscope_transport::{DepthLink, PersistentStreamReader, ReaderConfig, ReaderExit};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const FPS: u32 = 30;
const SECONDS: u32 = 3;
/// Half a second past the last full period, so three periods close even
/// though each one starts at the arrival of the frame that closed the last.
const FRAMES_SENT: u32 = FPS * SECONDS + FPS / 2;

fn nal_frame() -> Vec<u8> {
    let mut frame = vec![0x00, 0x00, 0x00, 0x01, 0x65];
    frame.extend(std::iter::repeat(0xAB).take(200));
    frame
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nal_producer_at_30_fps_reports_30_fps() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let producer = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.set_nodelay(true).unwrap();
        let frame = nal_frame();
        let mut ticker = tokio::time::interval(Duration::from_secs(1) / FPS);
        for _ in 0..FRAMES_SENT {
            ticker.tick().await;
            sock.write_all(&frame).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        sock.shutdown().await.unwrap();
    });

    let mut reader = PersistentStreamReader::new(
        StreamChannel::new(0, "h264-test", port, CodecKind::Nal),
        ReaderConfig {
            host: "127.0.0.1".into(),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(2),
            window_capacity: 10,
        },
    );
    let monitor = reader.monitor();

    // Sample while the producer is still streaming, after the third
    // period closed and before the end of the stream.
    let live_monitor = reader.monitor();
    let live = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(3300)).await;
        live_monitor.latest_snapshot()
    });

    let exit = reader.run(&CancellationToken::new()).await.unwrap();
    producer.await.unwrap();
    let during = live.await.unwrap();

    assert_eq!(during.state, ChannelState::Active);
    assert_eq!(during.samples, SECONDS as usize);
    assert!((during.current_fps - 30.0).abs() <= 1.0, "current={}", during.current_fps);
    assert!((during.average_fps - 30.0).abs() <= 1.0, "average={}", during.average_fps);
    assert!(during.peak_fps >= during.average_fps);
    assert!(during.bandwidth_mbps > 0.0);

    assert_eq!(exit, ReaderExit::PeerClosed);
    let snap = monitor.latest_snapshot();
    assert_eq!(snap.total_frames, u64::from(FRAMES_SENT));
    assert_eq!(snap.samples, SECONDS as usize);
    assert!((snap.average_fps - 30.0).abs() <= 1.0, "average={}", snap.average_fps);
    // Closed connection: idle, live rate zeroed.
    assert_eq!(snap.state, ChannelState::Idle);
    assert_eq!(snap.current_fps, 0.0);
    assert_eq!(snap.bandwidth_mbps, 0.0);
}

#[tokio::test]
async fn reader_can_be_restarted_after_idle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        for _ in 0..2 {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&[0xFF, 0xD8, 0x01, 0xFF, 0xD8, 0x02]).await.unwrap();
            sock.shutdown().await.unwrap();
        }
    });

    let mut reader = PersistentStreamReader::new(
        StreamChannel::new(3, "mjpeg-test", port, CodecKind::Marker),
        ReaderConfig {
            host: "127.0.0.1".into(),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
            window_capacity: 4,
        },
    );
    let cancel = CancellationToken::new();

    assert_eq!(reader.run(&cancel).await.unwrap(), ReaderExit::PeerClosed);
    assert_eq!(reader.run(&cancel).await.unwrap(), ReaderExit::PeerClosed);
    assert_eq!(reader.monitor().latest_snapshot().total_frames, 4);
}

#[tokio::test]
async fn depth_link_delivers_payloads_and_stops_on_cancel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        for payload in [&b"depth-0"[..], &b"depth-1"[..]] {
            sock.write_all(&(payload.len() as u32).to_be_bytes()).await.unwrap();
            sock.write_all(payload).await.unwrap();
        }
        // Hold the connection open so the link stays in its receive loop.
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let link = DepthLink {
        host: "127.0.0.1".into(),
        port,
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_secs(5),
        max_payload: 1024,
    };
    let (tx, mut rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(link.run(tx, cancel.clone()));

    assert_eq!(&rx.recv().await.unwrap()[..], b"depth-0");
    assert_eq!(&rx.recv().await.unwrap()[..], b"depth-1");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("depth link honours cancellation")
        .unwrap();
}

#[tokio::test]
async fn depth_link_reconnects_when_producer_stalls_mid_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (accepted_tx, mut accepted) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&1000u32.to_be_bytes()).await.unwrap();
            sock.write_all(&[0x42; 10]).await.unwrap();
            // Keep every stalled connection open.
            held.push(sock);
            if accepted_tx.send(()).is_err() {
                break;
            }
        }
    });

    let link = DepthLink {
        host: "127.0.0.1".into(),
        port,
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_millis(200),
        max_payload: 4096,
    };
    let (tx, mut rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(link.run(tx, cancel.clone()));

    // 200 ms stall + 1 s reconnect delay, with slack.
    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(3), accepted.recv())
            .await
            .expect("depth link connects again after a stall")
            .unwrap();
    }
    assert!(rx.try_recv().is_err(), "partial payload must not be delivered");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}
