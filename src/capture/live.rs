use super::{CaptureRecord, LinkType};
use crate::config::FilterConfig;
use anyhow::Context;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// What a live capture produced on one read.
#[derive(Debug)]
pub enum LiveEvent {
    Record(CaptureRecord),
    /// The read timeout expired with no frame. Carries wall-clock time in the
    /// same epoch milliseconds as record timestamps.
    Timeout { now_ms: u64 },
}

/// Frames captured from a network device through libpcap.
pub struct LiveCapture {
    cap: ::pcap::Capture<::pcap::Active>,
    link_type: LinkType,
}

impl LiveCapture {
    /// Open `device` (or the default device) with a BPF filter derived from the
    /// ip/port part of `filter`.
    pub fn open(device: Option<&str>, filter: &FilterConfig) -> anyhow::Result<Self> {
        let device = match device {
            Some(name) => ::pcap::Device::list()?
                .into_iter()
                .find(|d| d.name == name)
                .with_context(|| format!("No such network device: {name}"))?,
            None => ::pcap::Device::lookup()?.context("Failed to find network device")?,
        };

        info!(
            "Monitoring device: {} ({})",
            device.name,
            device.desc.as_deref().unwrap_or("no description")
        );

        let mut cap = ::pcap::Capture::from_device(device)?
            .promisc(true)
            .snaplen(65536)
            .timeout(100)
            .buffer_size(1_000_000)
            .open()?;

        let expression = filter.bpf_expression();
        cap.filter(&expression, true)
            .with_context(|| format!("Failed to apply capture filter {expression:?}"))?;

        let link_type = LinkType::from_raw(u32::try_from(cap.get_datalink().0).unwrap_or_default());
        info!(filter = %expression, ?link_type, "Capture started");
        Ok(Self { cap, link_type })
    }
}

impl Iterator for LiveCapture {
    type Item = LiveEvent;

    /// Blocks for at most the read timeout. Any capture error other than the
    /// timeout ends the sequence.
    fn next(&mut self) -> Option<Self::Item> {
        match self.cap.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let secs = u64::try_from(ts.tv_sec).unwrap_or_default();
                let micros = u64::try_from(ts.tv_usec).unwrap_or_default();
                Some(LiveEvent::Record(CaptureRecord {
                    link_type: self.link_type,
                    timestamp_ms: secs * 1000 + micros / 1000,
                    frame: packet.data.to_vec(),
                }))
            }
            Err(::pcap::Error::TimeoutExpired) => {
                let now_ms = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
                Some(LiveEvent::Timeout { now_ms })
            }
            Err(e) => {
                warn!("Error reading packet: {e}");
                None
            }
        }
    }
}
