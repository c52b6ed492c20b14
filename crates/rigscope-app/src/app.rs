use std::time::{Duration, Instant};

use anyhow::Result;
use rigscope_core::link_stats::{primary_interface, PROC_NET_DEV};
use rigscope_core::{LinkRates, LinkSampler, RigConfig, StreamChannel};
use rigscope_decoder::ImageDepthCodec;
use rigscope_pointcloud::{PointCloudAssembler, PointCloudHandle};
use rigscope_transport::{
    DepthLink, ImuReceiver, ImuSnapshot, PersistentStreamReader, RateMonitor, ReaderConfig, ReaderExit,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Depth payloads waiting for reconstruction; newer ones are dropped beyond this.
const DEPTH_QUEUE: usize = 2;

type LinkReport = Vec<(String, LinkRates)>;

/// Main receiver loop.
///
/// # Tasks
/// - one `PersistentStreamReader` per configured stream (rate monitoring only)
/// - `DepthLink` → bounded queue → assembler on a blocking thread
/// - IMU receiver, when enabled and the rig answers the registration
/// - `/proc/net/dev` sampler
/// - reporter logging every snapshot once per `report_period_ms`
///
/// Ctrl-C cancels the root token; every task observes it and drops its own
/// sockets before `run` returns.
pub async fn run(config: RigConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    info!(
        "Rig {}: {} stream(s), depth :{}, imu :{}",
        config.host,
        config.streams.len(),
        config.depth_port,
        if config.imu_enabled { config.imu_port.to_string() } else { "off".into() }
    );

    // ── Stream readers ─────────────────────────────────────────────────────
    let reader_config = ReaderConfig {
        host:            config.host.clone(),
        connect_timeout: config.connect_timeout(),
        read_timeout:    config.read_timeout(),
        window_capacity: config.rate_window,
    };

    let mut handles = Vec::new();
    let mut monitors: Vec<(StreamChannel, RateMonitor)> = Vec::new();
    for channel in config.channels() {
        let reader = PersistentStreamReader::new(channel.clone(), reader_config.clone());
        monitors.push((channel, reader.monitor()));
        handles.push(tokio::spawn(supervise_stream(reader, config.restart_delay(), cancel.clone())));
    }

    // ── Depth → point cloud ────────────────────────────────────────────────
    let (depth_tx, depth_rx) = mpsc::channel(DEPTH_QUEUE);
    let link = DepthLink {
        host:            config.host.clone(),
        port:            config.depth_port,
        connect_timeout: config.connect_timeout(),
        read_timeout:    config.read_timeout(),
        max_payload:     config.max_depth_payload,
    };
    handles.push(tokio::spawn(link.run(depth_tx, cancel.clone())));

    let assembler = PointCloudAssembler::new(config.intrinsics, &config.depth, config.color);
    let cloud = assembler.handle();
    let codec = ImageDepthCodec::new(Some(config.depth.resolution()));
    let assembler_cancel = cancel.clone();
    let assembler_handle =
        tokio::task::spawn_blocking(move || assembler.run_blocking(codec, depth_rx, assembler_cancel));

    // ── IMU ────────────────────────────────────────────────────────────────
    let imu = if config.imu_enabled {
        let (tx, rx) = watch::channel(ImuSnapshot::default());
        match ImuReceiver::register(&config.host, config.imu_port).await {
            Ok(receiver) => {
                handles.push(tokio::spawn(receiver.run(tx, cancel.clone())));
                Some(rx)
            }
            Err(e) => {
                warn!("IMU unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    // ── Link sampler ───────────────────────────────────────────────────────
    let (link_tx, link_rx) = watch::channel(LinkReport::new());
    let sampler = LinkSampler::new(config.link_interfaces.iter().cloned());
    handles.push(tokio::spawn(sample_links(
        sampler,
        link_tx,
        Duration::from_millis(config.link_period_ms.max(1)),
        cancel.clone(),
    )));

    // ── Reporter ───────────────────────────────────────────────────────────
    let reporter = Reporter { monitors, cloud, imu, links: link_rx };
    handles.push(tokio::spawn(reporter.run(
        Duration::from_millis(config.report_period_ms.max(1)),
        cancel.clone(),
    )));

    wait_for_shutdown().await;
    cancel.cancel();

    join_workers(handles).await;
    // The depth link owned the sender; the assembler drains and exits.
    if let Err(e) = assembler_handle.await {
        warn!("Assembler task failed: {}", e);
    }

    info!("All workers stopped.");
    Ok(())
}

/// Resolves on Ctrl-C. Without a signal handler the receiver keeps running
/// until the process is killed.
async fn wait_for_shutdown() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down"),
        Err(e) => {
            warn!("Signal handler unavailable ({}), running until killed", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Await every worker; a panicked or aborted one is logged and the rest
/// are still joined. Returns the number of failed tasks.
async fn join_workers(handles: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for h in handles {
        if let Err(e) = h.await {
            warn!("Worker task failed: {}", e);
            failed += 1;
        }
    }
    failed
}

// ── Per-stream supervisor ──────────────────────────────────────────────────────

/// Runs one reader; with a restart delay configured, an idle reader is
/// started again after the delay instead of staying idle.
async fn supervise_stream(
    mut reader: PersistentStreamReader,
    restart_delay: Option<Duration>,
    cancel: CancellationToken,
) {
    let label = reader.channel().label.clone();

    loop {
        match reader.run(&cancel).await {
            Ok(ReaderExit::Cancelled) => break,
            Ok(exit) => debug!("Stream[{}] reader ended: {:?}", label, exit),
            Err(e) => debug!("Stream[{}] reader failed: {}", label, e),
        }

        let Some(delay) = restart_delay else {
            info!("Stream[{}] idle, not restarting", label);
            break;
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        info!("Stream[{}] restarting after {}ms", label, delay.as_millis());
    }
}

// ── Link sampler ───────────────────────────────────────────────────────────────

async fn sample_links(
    mut sampler: LinkSampler,
    tx: watch::Sender<LinkReport>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    let mut last = Instant::now();
    let mut warned = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let source = match tokio::fs::read_to_string(PROC_NET_DEV).await {
            Ok(s) => s,
            Err(e) => {
                if !warned {
                    warn!("Link stats unavailable ({}): {}", PROC_NET_DEV, e);
                    warned = true;
                }
                continue;
            }
        };
        let now = Instant::now();
        let rates = sampler.sample(&source, now.duration_since(last));
        last = now;
        tx.send_replace(rates);
    }
}

// ── Reporter ───────────────────────────────────────────────────────────────────

struct Reporter {
    monitors: Vec<(StreamChannel, RateMonitor)>,
    cloud:    PointCloudHandle,
    imu:      Option<watch::Receiver<ImuSnapshot>>,
    links:    watch::Receiver<LinkReport>,
}

impl Reporter {
    async fn run(self, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.report(),
            }
        }
    }

    fn report(&self) {
        for (channel, monitor) in &self.monitors {
            let s = monitor.latest_snapshot();
            info!(
                "Stream[{}] {} {:.1} fps (avg {:.1}, peak {:.1}) {:.2} Mbps frames={}",
                channel.label,
                s.state.label(),
                s.current_fps,
                s.average_fps,
                s.peak_fps,
                s.bandwidth_mbps,
                s.total_frames
            );
        }

        match self.cloud.latest_point_cloud() {
            Some(c) => info!("Cloud #{} {} points from {}", c.sequence(), c.len(), c.source()),
            None => debug!("Cloud none yet"),
        }

        if let Some(imu) = &self.imu {
            let s = *imu.borrow();
            match s.last {
                Some(sample) if !s.stale => info!(
                    "IMU {:.1} Hz |a|={:.2} m/s² |ω|={:.3} rad/s",
                    s.rate_hz,
                    sample.accelerometer.magnitude(),
                    sample.gyroscope.magnitude()
                ),
                Some(_) => warn!("IMU stale after {} packets", s.packets),
                None => debug!("IMU no samples yet"),
            }
        }

        let links = self.links.borrow();
        for (iface, r) in links.iter() {
            debug!(
                "Link[{}] rx {:.2} tx {:.2} avg {:.2} peak {:.2} Mbps {:?}",
                iface, r.rx_mbps, r.tx_mbps, r.average_mbps, r.peak_mbps, r.activity
            );
        }
        if let Some(primary) = primary_interface(&links) {
            info!("Link primary: {}", primary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicked_worker_does_not_stop_the_join() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let handles = vec![
            tokio::spawn(async { panic!("worker blew up"); }),
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = done_tx.send(());
            }),
        ];

        assert_eq!(join_workers(handles).await, 1);
        // The healthy worker was awaited to completion.
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn clean_workers_report_no_failures() {
        let cancel = CancellationToken::new();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let c = cancel.clone();
                tokio::spawn(async move { c.cancelled().await })
            })
            .collect();
        cancel.cancel();
        assert_eq!(join_workers(handles).await, 0);
    }
}
