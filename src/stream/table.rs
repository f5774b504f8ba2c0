//! The set of tracked connections and the dispatch loop that feeds them.

use super::connection::{Connection, ConnectionKey};
use crate::capture::CaptureRecord;
use crate::config::{FilterConfig, TableConfig};
use crate::http::{HttpParser, is_request_line};
use crate::packet::TcpSegment;
use crate::sink::SinkFactory;
use crate::worker::{Pipeline, Worker};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Counters kept by a [`ConnectionTable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub connections_created: u64,
    /// Removed after both directions sent FIN or RST.
    pub connections_closed: u64,
    /// Removed by the idle scan.
    pub connections_evicted: u64,
    /// Still open when the capture ended.
    pub connections_flushed: u64,
    pub segments_processed: u64,
    /// Filtered out, or belonging to no tracked connection.
    pub segments_dropped: u64,
    /// Frames that did not decode to a TCP segment.
    pub frames_dropped: u64,
}

struct Tracked {
    ordinal: u64,
    connection: Connection,
}

/// Owns every live [`Connection`] and routes segments to them.
///
/// Only the thread calling [`process_record`](Self::process_record) mutates
/// the table. Idle time is measured on capture timestamps, so replaying a file
/// evicts exactly as a live capture of the same traffic would.
pub struct ConnectionTable<F> {
    config: TableConfig,
    filter: Arc<FilterConfig>,
    factory: F,
    connections: HashMap<ConnectionKey, Tracked>,
    next_ordinal: u64,
    since_scan: u32,
    clock_ms: u64,
    stats: TableStats,
}

impl<F: SinkFactory> ConnectionTable<F> {
    pub fn new(config: TableConfig, filter: FilterConfig, factory: F) -> Self {
        Self {
            config,
            filter: Arc::new(filter),
            factory,
            connections: HashMap::new(),
            next_ordinal: 0,
            since_scan: 0,
            clock_ms: 0,
            stats: TableStats::default(),
        }
    }

    /// Feed every record of a capture source. Remaining connections stay
    /// open; call [`finish_all`](Self::finish_all) once the source is done.
    pub fn consume(&mut self, records: impl IntoIterator<Item = CaptureRecord>) {
        for record in records {
            self.process_record(&record);
        }
    }

    pub fn process_record(&mut self, record: &CaptureRecord) {
        match TcpSegment::from_record(record) {
            Ok(segment) => self.process_segment(&segment),
            Err(e) => {
                trace!(link_type = ?record.link_type, len = record.frame.len(), "Dropping frame: {e}");
                self.stats.frames_dropped += 1;
            }
        }
    }

    pub fn process_segment(&mut self, segment: &TcpSegment) {
        let src = (*segment.src.ip(), segment.src.port());
        let dst = (*segment.dst.ip(), segment.dst.port());
        if !self.filter.by_endpoints(src, dst) {
            self.stats.segments_dropped += 1;
            return;
        }

        self.stats.segments_processed += 1;
        self.clock_ms = self.clock_ms.max(segment.timestamp_ms);

        let key = ConnectionKey::new(segment.src, segment.dst);
        if let Some(tracked) = self.connections.get_mut(&key) {
            tracked.connection.on_segment(segment);
            if tracked.connection.is_closed() {
                self.remove(key);
                self.stats.connections_closed += 1;
                debug!(key = %key, "Connection closed");
            }
        } else if (segment.flags.syn && !segment.flags.ack) || is_request_line(&segment.payload) {
            self.open(key, segment);
        } else {
            trace!(key = %key, "Segment for untracked connection: {segment}");
            self.stats.segments_dropped += 1;
        }

        self.since_scan += 1;
        if self.since_scan >= self.config.scan_interval {
            self.since_scan = 0;
            self.evict_idle();
        }
    }

    fn open(&mut self, key: ConnectionKey, segment: &TcpSegment) {
        let pipeline = self.pipeline(key, segment);
        let mut connection = Connection::new(segment, pipeline);
        connection.on_segment(segment);

        debug!(
            key = %key,
            client = %segment.src,
            mid_stream = !segment.flags.syn,
            "Connection created"
        );
        self.stats.connections_created += 1;
        self.connections.insert(
            key,
            Tracked {
                ordinal: self.next_ordinal,
                connection,
            },
        );
        self.next_ordinal += 1;
    }

    fn pipeline(&mut self, key: ConnectionKey, segment: &TcpSegment) -> Pipeline {
        let parser = HttpParser::new(
            Arc::clone(&self.filter),
            self.factory.create(segment.src, segment.dst),
        );
        if !self.config.threaded {
            return Pipeline::Inline(parser);
        }

        match Worker::spawn(format!("http {key}"), parser, self.config.queue_depth) {
            Ok(worker) => Pipeline::Threaded(worker),
            Err(e) => {
                warn!(key = %key, "Failed to spawn parse worker, parsing inline: {e}");
                // The parser went down with the failed spawn.
                let sink = self.factory.create(segment.src, segment.dst);
                Pipeline::Inline(HttpParser::new(Arc::clone(&self.filter), sink))
            }
        }
    }

    fn remove(&mut self, key: ConnectionKey) {
        if let Some(mut tracked) = self.connections.remove(&key) {
            tracked.connection.finalize();
        }
    }

    /// Advance the clock without a segment and run the idle scan. Lets a live
    /// capture evict connections while the interface is quiet.
    pub fn tick(&mut self, now_ms: u64) {
        self.clock_ms = self.clock_ms.max(now_ms);
        self.since_scan = 0;
        self.evict_idle();
    }

    /// Finalize and drop connections that have seen no segment for longer
    /// than the idle timeout.
    pub fn evict_idle(&mut self) {
        let timeout_ms = u64::try_from(self.config.idle_timeout.as_millis()).unwrap_or(u64::MAX);
        let clock_ms = self.clock_ms;

        let mut idle: Vec<_> = self
            .connections
            .iter()
            .filter(|(_, t)| clock_ms.saturating_sub(t.connection.last_activity_ms()) > timeout_ms)
            .map(|(key, t)| (t.ordinal, *key))
            .collect();
        idle.sort_unstable();

        for (_, key) in idle {
            debug!(key = %key, "Evicting idle connection");
            self.remove(key);
            self.stats.connections_evicted += 1;
        }
    }

    /// Finalize every remaining connection, oldest first.
    pub fn finish_all(&mut self) {
        let mut remaining: Vec<_> = self.connections.drain().map(|(_, t)| t).collect();
        remaining.sort_unstable_by_key(|t| t.ordinal);

        for mut tracked in remaining {
            debug!(key = %tracked.connection.key(), "Flushing connection at end of capture");
            tracked.connection.finalize();
            self.stats.connections_flushed += 1;
        }
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<&Connection> {
        self.connections.get(key).map(|t| &t.connection)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> TableStats {
        self.stats
    }
}
