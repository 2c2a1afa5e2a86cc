//! Unreliable-channel path.
//!
//! Fire-and-forget in both directions: outbound frames get a sequence from a
//! space distinct from the reliable channel and are sent exactly once;
//! inbound payloads are queued as-is. No feedback, no ordering, no
//! deduplication; latest-wins is the application's business.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::transport::packet::{ChannelType, Packet};

/// State for the unreliable channel: a sequence counter and a delivery queue.
pub struct UnreliablePath {
    next_seq: u32,
    delivery: VecDeque<Bytes>,
    datagrams_sent: u64,
    datagrams_received: u64,
}

impl UnreliablePath {
    /// Create an empty path.
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            delivery: VecDeque::new(),
            datagrams_sent: 0,
            datagrams_received: 0,
        }
    }

    /// Build the single DATA frame for one outbound payload.
    pub fn next_packet(&mut self, payload: Bytes, now: u64) -> Packet {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.datagrams_sent += 1;
        Packet::data(ChannelType::Unreliable, seq, now as u32, payload)
    }

    /// Queue one inbound payload, regardless of its sequence.
    pub fn on_data(&mut self, pkt: &Packet) {
        self.datagrams_received += 1;
        self.delivery.push_back(pkt.payload.clone());
    }

    /// Pop the oldest queued payload, if any.
    pub fn pop_deliverable(&mut self) -> Option<Bytes> {
        self.delivery.pop_front()
    }

    /// Queued payloads not yet read by the application.
    pub fn pending(&self) -> usize {
        self.delivery.len()
    }

    /// Outbound datagrams produced.
    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent
    }

    /// Inbound datagrams queued.
    pub fn datagrams_received(&self) -> u64 {
        self.datagrams_received
    }
}

impl Default for UnreliablePath {
    fn default() -> Self {
        Self::new()
    }
}
