//! Reliable-channel receive side.
//!
//! Keeps the contiguous delivery frontier (`rcv_base`), a bounded reorder
//! buffer for segments that arrived above it, and builds the ACK/SACK
//! feedback frame emitted after every reliable DATA frame processed.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::transport::packet::{Packet, PacketType, SackBlock};
use crate::transport::seq::{seq_in_window, seq_lt, seq_offset};
use crate::transport::SACK_MAX_BLOCKS;

/// Selective-repeat receiver for the reliable channel.
pub struct ReliableReceiver {
    /// Next expected sequence; everything below it has been delivered.
    rcv_base: u32,
    /// Reorder-buffer capacity in slots; also the advertised window base.
    window: u32,
    sack_enabled: bool,
    /// Out-of-order segments keyed by sequence, all strictly above
    /// `rcv_base`, one slot per sequence.
    reorder: HashMap<u32, Bytes>,
    /// Contiguous bytes ready for the application.
    delivery: BytesMut,
    /// Most recently buffered sequence, prioritized in SACK selection.
    last_insert: Option<u32>,

    segments_received: u64,
    duplicates: u64,
    out_of_window: u64,
}

impl ReliableReceiver {
    /// Create a receiver advertising `window` reorder slots.
    pub fn new(window: u32, sack_enabled: bool) -> Self {
        Self {
            rcv_base: 0,
            window,
            sack_enabled,
            reorder: HashMap::new(),
            delivery: BytesMut::new(),
            last_insert: None,
            segments_received: 0,
            duplicates: 0,
            out_of_window: 0,
        }
    }

    /// Process one reliable DATA frame and build the feedback frame for it.
    pub fn on_data(&mut self, pkt: &Packet) -> Packet {
        debug_assert_eq!(pkt.packet_type, PacketType::Data);
        self.segments_received += 1;
        let seq = pkt.seq;

        if seq == self.rcv_base {
            self.delivery.extend_from_slice(&pkt.payload);
            self.rcv_base = self.rcv_base.wrapping_add(1);
            // Absorb every contiguous successor the gap was hiding.
            while let Some(payload) = self.reorder.remove(&self.rcv_base) {
                self.delivery.extend_from_slice(&payload);
                self.rcv_base = self.rcv_base.wrapping_add(1);
            }
        } else if seq_lt(seq, self.rcv_base) {
            self.duplicates += 1;
            trace!(seq, base = self.rcv_base, "duplicate below frontier");
        } else if seq_in_window(self.rcv_base, seq, self.window) {
            if self.reorder.contains_key(&seq) {
                self.duplicates += 1;
            } else {
                trace!(seq, base = self.rcv_base, "buffered out of order");
                self.reorder.insert(seq, pkt.payload.clone());
                self.last_insert = Some(seq);
            }
        } else {
            self.out_of_window += 1;
            trace!(seq, base = self.rcv_base, "outside receive window, dropped");
        }

        self.feedback(pkt.timestamp)
    }

    /// Take up to `max_bytes` of the contiguous delivered stream.
    pub fn pop_deliverable(&mut self, max_bytes: usize) -> Bytes {
        let n = max_bytes.min(self.delivery.len());
        self.delivery.split_to(n).freeze()
    }

    fn feedback(&self, echo_timestamp: u32) -> Packet {
        let window = self.advertised_window();
        if self.sack_enabled {
            let blocks = self.build_sack_blocks(SACK_MAX_BLOCKS);
            if !blocks.is_empty() {
                return Packet::sack(self.rcv_base, window, echo_timestamp, blocks);
            }
        }
        Packet::ack(self.rcv_base, window, echo_timestamp)
    }

    /// Merge the reorder buffer into closed ranges and pick at most `limit`
    /// of them: the most recently updated range first, then the highest
    /// ranges. The result is emitted in ascending serial order.
    fn build_sack_blocks(&self, limit: usize) -> Vec<SackBlock> {
        if self.reorder.is_empty() {
            return Vec::new();
        }

        let mut seqs: Vec<u32> = self.reorder.keys().copied().collect();
        seqs.sort_unstable_by_key(|&s| seq_offset(self.rcv_base, s));

        let mut blocks: Vec<SackBlock> = Vec::new();
        for seq in seqs {
            match blocks.last_mut() {
                Some(last) if seq == last.end.wrapping_add(1) => last.end = seq,
                _ => blocks.push(SackBlock::new(seq, seq)),
            }
        }

        if blocks.len() > limit {
            let recent = self
                .last_insert
                .and_then(|seq| blocks.iter().position(|b| b.contains(seq)));

            let mut picked: Vec<usize> = Vec::with_capacity(limit);
            if let Some(idx) = recent {
                picked.push(idx);
            }
            // Highest ranges fill the remaining slots.
            for idx in (0..blocks.len()).rev() {
                if picked.len() == limit {
                    break;
                }
                if !picked.contains(&idx) {
                    picked.push(idx);
                }
            }
            picked.sort_unstable();
            blocks = picked.into_iter().map(|i| blocks[i]).collect();
        }
        blocks
    }

    /// Free reorder slots, saturated to the 16-bit wire field.
    pub fn advertised_window(&self) -> u16 {
        let free = self.window.saturating_sub(self.reorder.len() as u32);
        free.min(u16::MAX as u32) as u16
    }

    /// Next expected sequence number.
    pub fn rcv_base(&self) -> u32 {
        self.rcv_base
    }

    /// Buffered out-of-order segments.
    pub fn occupancy(&self) -> usize {
        self.reorder.len()
    }

    /// Bytes delivered and not yet read by the application.
    pub fn deliverable_len(&self) -> usize {
        self.delivery.len()
    }

    /// Total reliable DATA frames processed.
    pub fn segments_received(&self) -> u64 {
        self.segments_received
    }

    /// Frames discarded as duplicates (below the frontier or already
    /// buffered).
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Frames dropped for falling outside the receive window.
    pub fn out_of_window(&self) -> u64 {
        self.out_of_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::packet::ChannelType;

    fn data(seq: u32, payload: &'static str) -> Packet {
        Packet::data(ChannelType::Reliable, seq, 0, Bytes::from_static(payload.as_bytes()))
    }

    fn receiver() -> ReliableReceiver {
        ReliableReceiver::new(16, true)
    }

    #[test]
    fn test_in_order_delivery() {
        let mut r = receiver();

        let fb = r.on_data(&data(0, "aa"));
        assert_eq!(fb.packet_type, PacketType::Ack);
        assert_eq!(fb.ack, 1);

        let fb = r.on_data(&data(1, "bb"));
        assert_eq!(fb.ack, 2);

        assert_eq!(r.pop_deliverable(1024).as_ref(), b"aabb");
    }

    #[test]
    fn test_out_of_order_buffered_then_absorbed() {
        let mut r = receiver();

        let fb = r.on_data(&data(2, "CC"));
        assert_eq!(fb.packet_type, PacketType::Sack);
        assert_eq!(fb.ack, 0);
        assert_eq!(fb.sack, vec![SackBlock::new(2, 2)]);

        let fb = r.on_data(&data(0, "AA"));
        assert_eq!(fb.ack, 1);

        // Filling the hole absorbs the buffered successor too.
        let fb = r.on_data(&data(1, "BB"));
        assert_eq!(fb.packet_type, PacketType::Ack);
        assert_eq!(fb.ack, 3);
        assert_eq!(r.occupancy(), 0);

        assert_eq!(r.pop_deliverable(1024).as_ref(), b"AABBCC");
    }

    #[test]
    fn test_duplicate_below_frontier_reacked() {
        let mut r = receiver();
        r.on_data(&data(0, "aa"));

        let fb = r.on_data(&data(0, "aa"));
        assert_eq!(fb.packet_type, PacketType::Ack);
        assert_eq!(fb.ack, 1);
        assert_eq!(r.duplicates(), 1);

        // Delivered bytes appear exactly once.
        assert_eq!(r.pop_deliverable(1024).as_ref(), b"aa");
        assert!(r.pop_deliverable(1024).is_empty());
    }

    #[test]
    fn test_duplicate_in_reorder_buffer_kept_once() {
        let mut r = receiver();
        r.on_data(&data(3, "x"));
        r.on_data(&data(3, "x"));

        assert_eq!(r.occupancy(), 1);
        assert_eq!(r.duplicates(), 1);
    }

    #[test]
    fn test_out_of_window_dropped_but_acked() {
        let mut r = ReliableReceiver::new(4, true);

        let fb = r.on_data(&data(10, "zz"));
        assert_eq!(fb.packet_type, PacketType::Ack);
        assert_eq!(fb.ack, 0);
        assert_eq!(r.occupancy(), 0);
        assert_eq!(r.out_of_window(), 1);
    }

    #[test]
    fn test_sack_blocks_sorted_and_above_base() {
        let mut r = receiver();
        for seq in [9, 2, 5, 3] {
            r.on_data(&data(seq, "p"));
        }

        let fb = r.on_data(&data(12, "p"));
        assert_eq!(fb.packet_type, PacketType::Sack);
        assert_eq!(
            fb.sack,
            vec![
                SackBlock::new(2, 3),
                SackBlock::new(5, 5),
                SackBlock::new(9, 9),
                SackBlock::new(12, 12),
            ]
        );
        for block in &fb.sack {
            assert!(seq_lt(fb.ack, block.start));
        }
    }

    #[test]
    fn test_sack_selection_prefers_recent_then_highest() {
        let mut r = ReliableReceiver::new(64, true);
        // Six isolated ranges; the last insert is the lowest one.
        for seq in [4, 6, 8, 10, 12] {
            r.on_data(&data(seq, "p"));
        }
        let fb = r.on_data(&data(2, "p"));

        assert_eq!(
            fb.sack,
            vec![
                SackBlock::new(2, 2),
                SackBlock::new(8, 8),
                SackBlock::new(10, 10),
                SackBlock::new(12, 12),
            ]
        );
    }

    #[test]
    fn test_sack_disabled_emits_plain_ack() {
        let mut r = ReliableReceiver::new(16, false);
        let fb = r.on_data(&data(5, "p"));

        assert_eq!(fb.packet_type, PacketType::Ack);
        assert_eq!(fb.ack, 0);
        assert!(fb.sack.is_empty());
    }

    #[test]
    fn test_advertised_window_tracks_occupancy() {
        let mut r = ReliableReceiver::new(8, true);
        assert_eq!(r.advertised_window(), 8);

        for seq in [2, 4, 6] {
            r.on_data(&data(seq, "p"));
        }
        assert_eq!(r.advertised_window(), 5);

        // Filling the gaps drains the buffer and restores the window.
        for seq in [0, 1, 3, 5] {
            r.on_data(&data(seq, "p"));
        }
        assert_eq!(r.occupancy(), 0);
        assert_eq!(r.advertised_window(), 8);
    }

    #[test]
    fn test_echo_timestamp_propagated() {
        let mut r = receiver();
        let mut pkt = data(0, "p");
        pkt.timestamp = 123;

        let fb = r.on_data(&pkt);
        assert_eq!(fb.echo_timestamp, 123);
    }

    #[test]
    fn test_pop_deliverable_respects_cap() {
        let mut r = receiver();
        r.on_data(&data(0, "abcdef"));

        assert_eq!(r.pop_deliverable(4).as_ref(), b"abcd");
        assert_eq!(r.deliverable_len(), 2);
        assert_eq!(r.pop_deliverable(100).as_ref(), b"ef");
    }

    #[test]
    fn test_sequence_space_wraps_through_zero() {
        let mut r = ReliableReceiver::new(8, true);
        r.rcv_base = u32::MAX - 1;

        r.on_data(&data(u32::MAX, "B"));
        let fb = r.on_data(&data(u32::MAX - 1, "A"));
        assert_eq!(fb.ack, 0);

        let fb = r.on_data(&data(0, "C"));
        assert_eq!(fb.ack, 1);
        assert_eq!(r.pop_deliverable(16).as_ref(), b"ABC");
    }
}
