//! One direction of a TCP connection.
//!
//! Payload is buffered per segment and only handed on once the peer has
//! acknowledged it. Acknowledgments seen at the capture point are taken as the
//! release boundary; real receive windows and SACK are not modelled, so a gap
//! that is never acknowledged stays buffered until the connection is evicted.

use super::seq::seq_compare;
use core::cmp::Reverse;

#[derive(Debug)]
struct PendingSegment {
    seq: u32,
    payload: Vec<u8>,
}

/// Reassembly buffer for one direction of a connection.
#[derive(Debug, Default)]
pub struct Stream {
    pending: Vec<PendingSegment>,
    last_ack: Option<u32>,
    closed: bool,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a segment's payload. Empty payloads and data at or behind the
    /// last release point are dropped. Returns whether the payload was kept.
    pub fn append(&mut self, seq: u32, payload: &[u8]) -> bool {
        if payload.is_empty() {
            return false;
        }
        if let Some(last) = self.last_ack
            && seq_compare(seq, last) < 0
        {
            return false;
        }
        self.pending.push(PendingSegment {
            seq,
            payload: payload.to_vec(),
        });
        true
    }

    /// Release every buffered segment that starts before `ack_seq`, ordered by
    /// sequence number, keeping only the first-observed copy of each `seq`.
    ///
    /// An ack that does not move past the previous one releases nothing.
    pub fn retrieve(&mut self, ack_seq: u32) -> Vec<Vec<u8>> {
        if let Some(last) = self.last_ack
            && seq_compare(ack_seq, last) <= 0
        {
            return Vec::new();
        }
        self.last_ack = Some(ack_seq);

        let (mut released, kept): (Vec<_>, Vec<_>) = core::mem::take(&mut self.pending)
            .into_iter()
            .partition(|s| seq_compare(s.seq, ack_seq) < 0);
        self.pending = kept;

        // Distance back from the ack orders correctly across the wrap point.
        // The sort is stable, so duplicates keep their arrival order.
        released.sort_by_key(|s| Reverse(ack_seq.wrapping_sub(s.seq)));
        released.dedup_by_key(|s| s.seq);
        released.into_iter().map(|s| s.payload).collect()
    }

    /// Number of segments waiting for an acknowledgment.
    pub fn pending_segments(&self) -> usize {
        self.pending.len()
    }

    pub fn last_ack(&self) -> Option<u32> {
        self.last_ack
    }

    /// Mark this direction as finished (FIN or RST seen).
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_release() {
        let mut stream = Stream::new();
        assert!(stream.append(100, b"Hello "));
        assert!(stream.append(106, b"World"));

        assert_eq!(stream.retrieve(111), vec![b"Hello ".to_vec(), b"World".to_vec()]);
        assert_eq!(stream.pending_segments(), 0);
        assert_eq!(stream.last_ack(), Some(111));
    }

    #[test]
    fn test_out_of_order_segments_are_sorted() {
        let mut stream = Stream::new();
        stream.append(106, b"World");
        stream.append(100, b"Hello ");

        assert_eq!(stream.retrieve(111), vec![b"Hello ".to_vec(), b"World".to_vec()]);
    }

    #[test]
    fn test_only_acknowledged_segments_are_released() {
        let mut stream = Stream::new();
        stream.append(100, b"abc");
        stream.append(103, b"def");

        assert_eq!(stream.retrieve(103), vec![b"abc".to_vec()]);
        assert_eq!(stream.pending_segments(), 1);
        assert_eq!(stream.retrieve(106), vec![b"def".to_vec()]);
    }

    #[test]
    fn test_duplicates_keep_first_observed() {
        let mut stream = Stream::new();
        stream.append(100, b"first");
        stream.append(105, b"tail");
        stream.append(100, b"again");

        let released = stream.retrieve(109);
        assert_eq!(released, vec![b"first".to_vec(), b"tail".to_vec()]);
    }

    #[test]
    fn test_stale_ack_releases_nothing() {
        let mut stream = Stream::new();
        stream.append(100, b"abc");
        assert_eq!(stream.retrieve(103).len(), 1);

        stream.append(103, b"def");
        assert!(stream.retrieve(103).is_empty());
        assert!(stream.retrieve(50).is_empty());
        assert_eq!(stream.last_ack(), Some(103));
        assert_eq!(stream.retrieve(106).len(), 1);
    }

    #[test]
    fn test_data_behind_release_point_is_dropped() {
        let mut stream = Stream::new();
        stream.append(100, b"abc");
        stream.retrieve(103);

        // Retransmission of already released data
        assert!(!stream.append(100, b"abc"));
        assert!(!stream.append(103, b""));
        assert!(stream.append(103, b"def"));
    }

    #[test]
    fn test_release_across_wraparound() {
        let mut stream = Stream::new();
        stream.append(2, b"after");
        stream.append(0xFFFF_FFFC, b"before");

        let released = stream.retrieve(7);
        assert_eq!(released, vec![b"before".to_vec(), b"after".to_vec()]);
    }

    #[test]
    fn test_close() {
        let mut stream = Stream::new();
        assert!(!stream.is_closed());
        stream.close();
        assert!(stream.is_closed());
    }
}
