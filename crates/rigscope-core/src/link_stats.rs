//! Link-layer byte counters for the NICs that may carry rig traffic.
//!
//! Reads `/proc/net/dev` on a fixed period and turns counter deltas into
//! Mbps, so the operator can see whether the rig streams over Ethernet
//! or Wi-Fi.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tracing::warn;

use crate::errors::MetricsError;

pub const PROC_NET_DEV: &str = "/proc/net/dev";

/// Rate samples kept per interface for average / peak.
pub const LINK_HISTORY: usize = 15;

// MARK: - LinkCounters

/// Raw cumulative counters of one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}

/// Extract `iface`'s counters from `/proc/net/dev`-formatted text.
///
/// Line format: `  eno2: rx_bytes rx_packets errs drop fifo frame compressed multicast tx_bytes tx_packets …`
pub fn parse_link_counters(source: &str, iface: &str) -> Result<LinkCounters, MetricsError> {
    let prefix = format!("{}:", iface);
    let line = source
        .lines()
        .map(str::trim_start)
        .find(|l| l.starts_with(&prefix))
        .ok_or_else(|| MetricsError::UnknownInterface(iface.to_owned()))?;

    let fields: Vec<&str> = line[prefix.len()..].split_whitespace().collect();
    if fields.len() < 10 {
        return Err(MetricsError::MalformedMetrics {
            iface: iface.to_owned(),
            reason: format!("expected at least 10 columns, found {}", fields.len()),
        });
    }

    let column = |i: usize| -> Result<u64, MetricsError> {
        fields[i].parse().map_err(|_| MetricsError::MalformedMetrics {
            iface: iface.to_owned(),
            reason: format!("column {} is not a counter: {:?}", i, fields[i]),
        })
    };

    Ok(LinkCounters {
        rx_bytes: column(0)?,
        rx_packets: column(1)?,
        tx_bytes: column(8)?,
        tx_packets: column(9)?,
    })
}

// MARK: - LinkRates

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkActivity {
    /// Average above 5 Mbps.
    Active,
    /// Average above 1 Mbps.
    Light,
    Idle,
}

impl LinkActivity {
    pub fn classify(average_mbps: f64) -> Self {
        if average_mbps > 5.0 {
            Self::Active
        } else if average_mbps > 1.0 {
            Self::Light
        } else {
            Self::Idle
        }
    }
}

/// One sampling period's view of an interface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkRates {
    pub rx_mbps: f64,
    pub tx_mbps: f64,
    pub total_mbps: f64,
    pub average_mbps: f64,
    pub peak_mbps: f64,
    pub counters: LinkCounters,
    pub activity: LinkActivity,
}

impl LinkRates {
    fn zeroed() -> Self {
        Self {
            rx_mbps: 0.0,
            tx_mbps: 0.0,
            total_mbps: 0.0,
            average_mbps: 0.0,
            peak_mbps: 0.0,
            counters: LinkCounters::default(),
            activity: LinkActivity::Idle,
        }
    }
}

// MARK: - LinkSampler

#[derive(Debug, Default)]
struct LinkTrack {
    previous: Option<LinkCounters>,
    history: VecDeque<f64>,
}

/// Delta-based bandwidth sampler over a fixed interface set.
#[derive(Debug)]
pub struct LinkSampler {
    interfaces: Vec<String>,
    tracks: HashMap<String, LinkTrack>,
}

impl LinkSampler {
    pub fn new(interfaces: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let interfaces: Vec<String> = interfaces.into_iter().map(Into::into).collect();
        let tracks = interfaces.iter().map(|i| (i.clone(), LinkTrack::default())).collect();
        Self { interfaces, tracks }
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Feed one `/proc/net/dev` snapshot taken `elapsed` after the previous one.
    ///
    /// Interfaces whose counters cannot be parsed report zeroed rates; the
    /// first sample of an interface only primes its baseline.
    pub fn sample(&mut self, source: &str, elapsed: Duration) -> Vec<(String, LinkRates)> {
        let secs = elapsed.as_secs_f64();
        let mut out = Vec::with_capacity(self.interfaces.len());

        for iface in &self.interfaces {
            let track = self.tracks.entry(iface.clone()).or_default();
            let current = match parse_link_counters(source, iface) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Link[{}] {}", iface, e);
                    out.push((iface.clone(), LinkRates::zeroed()));
                    continue;
                }
            };

            let (rx_mbps, tx_mbps) = match track.previous {
                Some(prev) if secs > 0.0 => (
                    mbps(prev.rx_bytes, current.rx_bytes, secs),
                    mbps(prev.tx_bytes, current.tx_bytes, secs),
                ),
                _ => (0.0, 0.0),
            };
            let primed = track.previous.is_some();
            track.previous = Some(current);

            let total_mbps = rx_mbps + tx_mbps;
            if primed {
                if track.history.len() == LINK_HISTORY {
                    track.history.pop_front();
                }
                track.history.push_back(total_mbps);
            }

            let (average_mbps, peak_mbps) = if track.history.is_empty() {
                (0.0, 0.0)
            } else {
                let sum: f64 = track.history.iter().sum();
                let peak = track.history.iter().copied().fold(0.0_f64, f64::max);
                (sum / track.history.len() as f64, peak)
            };

            out.push((
                iface.clone(),
                LinkRates {
                    rx_mbps,
                    tx_mbps,
                    total_mbps,
                    average_mbps,
                    peak_mbps,
                    counters: current,
                    activity: LinkActivity::classify(average_mbps),
                },
            ));
        }
        out
    }
}

/// Interface with the highest non-zero average, if any.
pub fn primary_interface(rates: &[(String, LinkRates)]) -> Option<&str> {
    rates
        .iter()
        .filter(|(_, r)| r.average_mbps > 0.0)
        .max_by(|a, b| a.1.average_mbps.total_cmp(&b.1.average_mbps))
        .map(|(name, _)| name.as_str())
}

fn mbps(previous: u64, current: u64, secs: f64) -> f64 {
    // Counter reset (driver reload, wrap) reads as no traffic.
    let delta = current.saturating_sub(previous);
    (delta as f64 * 8.0) / (secs * 1_000_000.0)
}
