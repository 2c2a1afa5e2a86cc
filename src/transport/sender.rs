//! Reliable-channel send side.
//!
//! Owns the segment queue between intake and acknowledgment: a sliding window
//! of at most `W` transmitted-but-unacknowledged segments, per-segment
//! retransmission deadlines with exponential backoff, RTT sampling under
//! Karn's rule, and SACK-driven selective repair.
//!
//! The sender holds no clock and performs no I/O. The facade passes `now`
//! into every time-dependent call and ships the frames this module produces.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::transport::packet::{ChannelType, Packet, SackBlock};
use crate::transport::rto::{RtoEstimator, MAX_RTO_MS};
use crate::transport::seq::{seq_le, seq_lt, seq_offset};

/// One segment tracked by the sender.
///
/// Lifecycle: created on intake (unsent) → transmitted (timestamps and
/// deadline set) → retained until cumulatively acknowledged → retired.
#[derive(Debug)]
struct Segment {
    seq: u32,
    payload: Bytes,
    /// Monotonic ms of the first transmission; `None` while unsent.
    first_sent_at: Option<u64>,
    last_sent_at: u64,
    retx_count: u32,
    /// Set by a SACK block; the segment stays queued until `send_base`
    /// passes it.
    acked: bool,
    /// One SACK-driven repair per timeout interval; cleared when the timer
    /// retransmits.
    fast_repaired: bool,
    /// Next retransmission deadline (monotonic ms).
    deadline: u64,
    /// Effective timeout; doubles on every retransmission, capped.
    timeout_ms: u64,
}

/// Snapshot of the sender's RTT estimate and counters.
#[derive(Debug, Clone)]
pub struct SenderMetrics {
    /// Smoothed RTT (ms), if any clean sample has been taken
    pub srtt_ms: Option<u64>,
    /// RTT variance (ms)
    pub rttvar_ms: u64,
    /// Current retransmission timeout (ms)
    pub rto_ms: u64,
    /// Smallest clean RTT sample (ms)
    pub rtt_min_ms: Option<u64>,
    /// Largest clean RTT sample (ms)
    pub rtt_max_ms: Option<u64>,
    /// Mean of clean RTT samples (ms)
    pub rtt_mean_ms: Option<u64>,
    /// Number of clean RTT samples
    pub rtt_samples: u64,
    /// Segments transmitted for the first time
    pub segments_sent: u64,
    /// Timer-driven retransmissions
    pub retransmits: u64,
    /// SACK-driven immediate repairs
    pub fast_repairs: u64,
    /// Feedback frames that did not advance the window
    pub duplicate_acks: u64,
    /// Transmitted segments currently awaiting acknowledgment
    pub in_flight: usize,
    /// Accepted-but-unsent bytes
    pub backlog_bytes: usize,
}

/// Selective-repeat sender for the reliable channel.
pub struct ReliableSender {
    /// Segments in serial order, contiguous from `send_base` to `next_seq`.
    segments: VecDeque<Segment>,
    send_base: u32,
    next_seq: u32,
    /// Sliding-window size in segments.
    window: u32,
    mss: usize,
    /// Peer's advertised free slots; zero pauses new transmissions.
    peer_window: u16,
    unsent_bytes: usize,
    estimator: RtoEstimator,

    segments_sent: u64,
    retransmits: u64,
    fast_repairs: u64,
    duplicate_acks: u64,
    rtt_min: Option<u64>,
    rtt_max: Option<u64>,
    rtt_sum: u64,
    rtt_samples: u64,
}

impl ReliableSender {
    /// Create a sender with the given window (segments) and MSS (bytes).
    pub fn new(window: u32, mss: usize) -> Self {
        Self {
            segments: VecDeque::new(),
            send_base: 0,
            next_seq: 0,
            window,
            mss,
            peer_window: u16::MAX,
            unsent_bytes: 0,
            estimator: RtoEstimator::new(),
            segments_sent: 0,
            retransmits: 0,
            fast_repairs: 0,
            duplicate_acks: 0,
            rtt_min: None,
            rtt_max: None,
            rtt_sum: 0,
            rtt_samples: 0,
        }
    }

    /// Accept one payload as a new segment, or refuse it when the unsent
    /// backlog already holds `W · MSS` bytes.
    pub fn try_enqueue(&mut self, payload: Bytes) -> Option<u32> {
        if self.unsent_bytes + payload.len() > self.window as usize * self.mss {
            return None;
        }

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.unsent_bytes += payload.len();
        self.segments.push_back(Segment {
            seq,
            payload,
            first_sent_at: None,
            last_sent_at: 0,
            retx_count: 0,
            acked: false,
            fast_repaired: false,
            deadline: 0,
            timeout_ms: 0,
        });
        Some(seq)
    }

    /// Build the DATA frames due at `now`: never-sent segments inside the
    /// window (unless the peer advertises zero), plus transmitted segments
    /// whose deadline has passed.
    pub fn due_packets(&mut self, now: u64) -> Vec<Packet> {
        let mut out = Vec::new();
        let rto = self.estimator.rto_ms();

        for seg in &mut self.segments {
            if seq_offset(self.send_base, seg.seq) >= self.window {
                break;
            }
            if seg.acked {
                continue;
            }

            if seg.first_sent_at.is_none() {
                if self.peer_window == 0 {
                    continue;
                }
                seg.first_sent_at = Some(now);
                seg.last_sent_at = now;
                seg.timeout_ms = rto;
                seg.deadline = now + rto;
                self.unsent_bytes -= seg.payload.len();
                self.segments_sent += 1;
                trace!(seq = seg.seq, len = seg.payload.len(), rto, "tx");
                out.push(Self::frame(seg, now));
            } else if now >= seg.deadline {
                seg.retx_count += 1;
                seg.timeout_ms = (seg.timeout_ms * 2).min(MAX_RTO_MS);
                seg.deadline = now + seg.timeout_ms;
                seg.last_sent_at = now;
                seg.fast_repaired = false;
                self.retransmits += 1;
                debug!(
                    seq = seg.seq,
                    retx = seg.retx_count,
                    timeout = seg.timeout_ms,
                    "retransmit"
                );
                out.push(Self::frame(seg, now));
            }
        }
        out
    }

    /// Process an ACK or SACK frame. Returns fast-repair retransmissions to
    /// put on the wire immediately.
    pub fn on_feedback(&mut self, pkt: &Packet, now: u64) -> Vec<Packet> {
        self.peer_window = pkt.recv_window;
        self.process_cumulative(pkt.ack, now);

        if pkt.sack.is_empty() {
            return Vec::new();
        }

        for block in &pkt.sack {
            for seg in &mut self.segments {
                if !seg.acked && block.contains(seg.seq) {
                    seg.acked = true;
                    trace!(seq = seg.seq, "sacked");
                }
            }
        }

        self.fast_repair(&pkt.sack, now)
    }

    /// Retransmit unacked segments below the lowest SACK start: receipt
    /// above them implies they were lost, not delayed. Each segment repairs
    /// at most once per timeout interval, so a burst of SACKs cannot storm
    /// the same hole.
    fn fast_repair(&mut self, blocks: &[SackBlock], now: u64) -> Vec<Packet> {
        let Some(lowest) = blocks
            .iter()
            .map(|b| b.start)
            .reduce(|a, b| if seq_lt(b, a) { b } else { a })
        else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for seg in &mut self.segments {
            if !seq_lt(seg.seq, lowest) {
                break;
            }
            if seg.acked || seg.first_sent_at.is_none() || seg.fast_repaired {
                continue;
            }
            seg.fast_repaired = true;
            seg.retx_count += 1;
            seg.timeout_ms = (seg.timeout_ms * 2).min(MAX_RTO_MS);
            seg.deadline = now + seg.timeout_ms;
            seg.last_sent_at = now;
            self.fast_repairs += 1;
            debug!(seq = seg.seq, below = lowest, "fast repair");
            out.push(Self::frame(seg, now));
        }
        out
    }

    fn process_cumulative(&mut self, ack: u32, now: u64) {
        if ack == self.send_base {
            self.duplicate_acks += 1;
            return;
        }
        if !(seq_lt(self.send_base, ack) && seq_le(ack, self.next_seq)) {
            trace!(ack, base = self.send_base, "feedback outside window, ignored");
            return;
        }

        self.sample_rtt(ack.wrapping_sub(1), now);

        while self.segments.front().is_some_and(|s| seq_lt(s.seq, ack)) {
            if let Some(seg) = self.segments.pop_front() {
                if seg.first_sent_at.is_none() {
                    self.unsent_bytes -= seg.payload.len();
                }
            }
        }
        self.send_base = ack;
    }

    /// Karn's rule: only the segment just below the cumulative ack, and only
    /// if it was never retransmitted, contributes an RTT sample.
    fn sample_rtt(&mut self, seq: u32, now: u64) {
        let Some(seg) = self.segments.iter().find(|s| s.seq == seq) else {
            return;
        };
        if seg.retx_count != 0 {
            return;
        }
        let Some(first_sent_at) = seg.first_sent_at else {
            return;
        };

        let sample = now.saturating_sub(first_sent_at).max(1);
        self.estimator.on_sample(sample);
        self.rtt_min = Some(self.rtt_min.map_or(sample, |v| v.min(sample)));
        self.rtt_max = Some(self.rtt_max.map_or(sample, |v| v.max(sample)));
        self.rtt_sum += sample;
        self.rtt_samples += 1;
    }

    fn frame(seg: &Segment, now: u64) -> Packet {
        // The wire timestamp always carries the first transmission time.
        let ts = seg.first_sent_at.unwrap_or(now) as u32;
        Packet::data(ChannelType::Reliable, seg.seq, ts, seg.payload.clone())
    }

    /// True when every intaken segment has been cumulatively acknowledged.
    pub fn is_drained(&self) -> bool {
        self.send_base == self.next_seq
    }

    /// Transmitted segments currently awaiting acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.first_sent_at.is_some() && !s.acked)
            .count()
    }

    /// Accepted-but-unsent bytes.
    pub fn backlog_bytes(&self) -> usize {
        self.unsent_bytes
    }

    /// Lowest unacknowledged sequence.
    pub fn send_base(&self) -> u32 {
        self.send_base
    }

    /// Next sequence to assign.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// RTT estimator state.
    pub fn estimator(&self) -> &RtoEstimator {
        &self.estimator
    }

    /// Snapshot the RTT estimate and counters.
    pub fn metrics(&self) -> SenderMetrics {
        SenderMetrics {
            srtt_ms: self.estimator.srtt_ms(),
            rttvar_ms: self.estimator.rttvar_ms(),
            rto_ms: self.estimator.rto_ms(),
            rtt_min_ms: self.rtt_min,
            rtt_max_ms: self.rtt_max,
            rtt_mean_ms: (self.rtt_samples > 0).then(|| self.rtt_sum / self.rtt_samples),
            rtt_samples: self.rtt_samples,
            segments_sent: self.segments_sent,
            retransmits: self.retransmits,
            fast_repairs: self.fast_repairs,
            duplicate_acks: self.duplicate_acks,
            in_flight: self.in_flight(),
            backlog_bytes: self.unsent_bytes,
        }
    }

    #[cfg(test)]
    fn segment_timeout(&self, seq: u32) -> Option<u64> {
        self.segments
            .iter()
            .find(|s| s.seq == seq)
            .map(|s| s.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::rto::INITIAL_RTO_MS;

    fn sender(window: u32) -> ReliableSender {
        ReliableSender::new(window, 64)
    }

    fn fill(s: &mut ReliableSender, n: usize) {
        for i in 0..n {
            assert!(s.try_enqueue(Bytes::from(format!("seg-{i}"))).is_some());
        }
    }

    fn ack(ack: u32, window: u16) -> Packet {
        Packet::ack(ack, window, 0)
    }

    fn sack(ack: u32, blocks: Vec<SackBlock>) -> Packet {
        Packet::sack(ack, 16, 0, blocks)
    }

    #[test]
    fn test_window_gates_first_transmission() {
        let mut s = sender(4);
        fill(&mut s, 6);

        let out = s.due_packets(0);
        let seqs: Vec<u32> = out.iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(s.in_flight(), 4);

        // Nothing more until the window opens.
        assert!(s.due_packets(10).is_empty());
    }

    #[test]
    fn test_backlog_bounded_by_window_times_mss() {
        let mut s = ReliableSender::new(2, 8);

        assert!(s.try_enqueue(Bytes::from(vec![0u8; 8])).is_some());
        assert!(s.try_enqueue(Bytes::from(vec![0u8; 8])).is_some());
        assert!(s.try_enqueue(Bytes::from(vec![0u8; 1])).is_none());

        // Transmission frees backlog space even before acknowledgment.
        s.due_packets(0);
        assert_eq!(s.backlog_bytes(), 0);
        assert!(s.try_enqueue(Bytes::from(vec![0u8; 8])).is_some());
    }

    #[test]
    fn test_cumulative_ack_advances_base() {
        let mut s = sender(4);
        fill(&mut s, 6);
        s.due_packets(0);

        let repairs = s.on_feedback(&ack(2, 16), 30);
        assert!(repairs.is_empty());
        assert_eq!(s.send_base(), 2);
        assert_eq!(s.in_flight(), 2);

        // The window slid; two more first transmissions become due.
        let out = s.due_packets(31);
        let seqs: Vec<u32> = out.iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![4, 5]);
    }

    #[test]
    fn test_rtt_sampled_from_clean_segment() {
        let mut s = sender(4);
        fill(&mut s, 2);
        s.due_packets(0);

        s.on_feedback(&ack(1, 16), 50);
        assert_eq!(s.estimator().srtt_ms(), Some(50));

        let m = s.metrics();
        assert_eq!(m.rtt_samples, 1);
        assert_eq!(m.rtt_min_ms, Some(50));
        assert_eq!(m.rtt_max_ms, Some(50));
    }

    #[test]
    fn test_karn_excludes_retransmitted_segment() {
        let mut s = sender(4);
        fill(&mut s, 1);
        s.due_packets(0);

        // Deadline passes; segment 0 is retransmitted exactly once.
        let out = s.due_packets(INITIAL_RTO_MS);
        assert_eq!(out.len(), 1);
        assert_eq!(s.metrics().retransmits, 1);

        // The late ACK must not feed the estimator.
        s.on_feedback(&ack(1, 16), INITIAL_RTO_MS + 20);
        assert!(!s.estimator().has_sample());
        assert!(s.is_drained());
    }

    #[test]
    fn test_retransmission_backoff_doubles_and_caps() {
        let mut s = sender(1);
        fill(&mut s, 1);
        s.due_packets(0);
        assert_eq!(s.segment_timeout(0), Some(INITIAL_RTO_MS));

        let mut now = 0;
        let mut expected = INITIAL_RTO_MS;
        for _ in 0..10 {
            now += expected;
            expected = (expected * 2).min(MAX_RTO_MS);
            let out = s.due_packets(now);
            assert_eq!(out.len(), 1, "deadline at {now} must fire");
            assert_eq!(s.segment_timeout(0), Some(expected));
        }
        assert_eq!(s.segment_timeout(0), Some(MAX_RTO_MS));

        // Before the next deadline nothing is due.
        assert!(s.due_packets(now + 1).is_empty());
    }

    #[test]
    fn test_retransmission_keeps_first_sent_timestamp() {
        let mut s = sender(1);
        fill(&mut s, 1);
        let first = s.due_packets(7);
        assert_eq!(first[0].timestamp, 7);

        let retx = s.due_packets(7 + INITIAL_RTO_MS);
        assert_eq!(retx[0].timestamp, 7);
    }

    #[test]
    fn test_sack_marks_without_advancing_base() {
        let mut s = sender(8);
        fill(&mut s, 4);
        s.due_packets(0);

        let repairs = s.on_feedback(&sack(0, vec![SackBlock::new(2, 3)]), 40);
        assert_eq!(s.send_base(), 0);
        assert_eq!(s.in_flight(), 2);

        // Segments 0 and 1 sit below the lowest SACK start: repaired now.
        let seqs: Vec<u32> = repairs.iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(s.metrics().fast_repairs, 2);

        // Sacked segments never retransmit.
        assert!(s.due_packets(40 + 10 * INITIAL_RTO_MS)
            .iter()
            .all(|p| p.seq < 2));
    }

    #[test]
    fn test_fast_repair_guarded_per_interval() {
        let mut s = sender(8);
        fill(&mut s, 3);
        s.due_packets(0);

        let first = s.on_feedback(&sack(0, vec![SackBlock::new(2, 2)]), 30);
        assert_eq!(first.len(), 2);

        // The same evidence again must not repair the same hole again.
        let second = s.on_feedback(&sack(0, vec![SackBlock::new(2, 2)]), 35);
        assert!(second.is_empty());

        // After the timer fires the segment earns one more repair.
        let retx = s.due_packets(30 + 2 * INITIAL_RTO_MS);
        assert_eq!(retx.len(), 2);
        let third = s.on_feedback(&sack(0, vec![SackBlock::new(2, 2)]), 31 + 2 * INITIAL_RTO_MS);
        assert_eq!(third.len(), 2);
    }

    #[test]
    fn test_sack_then_cumulative_retires_everything() {
        let mut s = sender(8);
        fill(&mut s, 4);
        s.due_packets(0);

        s.on_feedback(&sack(0, vec![SackBlock::new(1, 3)]), 20);
        assert!(!s.is_drained());

        s.on_feedback(&ack(4, 16), 60);
        assert!(s.is_drained());
        assert_eq!(s.in_flight(), 0);
    }

    #[test]
    fn test_zero_window_pauses_new_and_probes() {
        let mut s = sender(8);
        fill(&mut s, 2);
        s.due_packets(0);

        s.on_feedback(&ack(1, 0), 10);

        // New segment accepted but not transmitted while the window is zero.
        s.try_enqueue(Bytes::from_static(b"held")).unwrap();
        assert!(s.due_packets(20).is_empty());

        // The in-flight segment still probes on its deadline.
        let probe = s.due_packets(INITIAL_RTO_MS);
        assert_eq!(probe.len(), 1);
        assert_eq!(probe[0].seq, 1);

        // A window update releases the held segment.
        s.on_feedback(&ack(1, 4), INITIAL_RTO_MS + 5);
        assert_eq!(s.metrics().duplicate_acks, 1);
        let out = s.due_packets(INITIAL_RTO_MS + 6);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].seq, 2);
    }

    #[test]
    fn test_duplicate_and_stale_acks_ignored() {
        let mut s = sender(4);
        fill(&mut s, 3);
        s.due_packets(0);
        s.on_feedback(&ack(2, 16), 10);

        s.on_feedback(&ack(2, 16), 20);
        assert_eq!(s.metrics().duplicate_acks, 1);

        // Behind the base, and absurdly far ahead: both ignored.
        s.on_feedback(&ack(1, 16), 30);
        s.on_feedback(&ack(100, 16), 30);
        assert_eq!(s.send_base(), 2);
    }

    #[test]
    fn test_drain_state() {
        let mut s = sender(4);
        assert!(s.is_drained());

        fill(&mut s, 2);
        assert!(!s.is_drained());

        s.due_packets(0);
        s.on_feedback(&ack(2, 16), 10);
        assert!(s.is_drained());
        assert_eq!(s.due_packets(20).len(), 0);
    }
}
