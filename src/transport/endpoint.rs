//! Transport facade: the public surface of the engine.
//!
//! Owns the UDP socket and multiplexes both channels across it. All engine
//! state is reachable only through this type; the poll loop is the single
//! place where time advances and the socket is read.
//!
//! `send` and `recv` never block. The only suspension point is the bounded
//! socket wait inside `poll`; every transmission uses the socket's
//! non-blocking path.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::transport::packet::{ChannelType, Packet, PacketType};
use crate::transport::receiver::ReliableReceiver;
use crate::transport::sender::{ReliableSender, SenderMetrics};
use crate::transport::stats::TransportStats;
use crate::transport::unreliable::UnreliablePath;
use crate::transport::{TransportConfig, DRAIN_POLL_SLICE_MS};

/// Receive buffer size; comfortably above the largest legal datagram.
const RECV_BUF_LEN: usize = 2048;

/// A dual-channel transport endpoint over one UDP socket.
///
/// Generic over the [`Clock`] so tests can drive time by hand; production
/// code uses the [`SystemClock`] default.
pub struct Transport<C: Clock = SystemClock> {
    config: TransportConfig,
    clock: C,
    rng: StdRng,
    socket: Option<UdpSocket>,
    peer: Option<SocketAddr>,
    closed: bool,
    sender: ReliableSender,
    receiver: ReliableReceiver,
    unreliable: UnreliablePath,
    /// Feedback frames queued by the receiver, addressed to the DATA source.
    feedback: VecDeque<(Packet, SocketAddr)>,
    wire_buf: BytesMut,
    stats: TransportStats,
}

impl Transport<SystemClock> {
    /// Create a transport with the system clock and an entropy-seeded RNG.
    pub fn new(config: TransportConfig) -> Result<Self> {
        Self::with_clock_and_rng(config, SystemClock::new(), StdRng::from_entropy())
    }
}

impl<C: Clock> Transport<C> {
    /// Create a transport with an explicit clock and RNG, for deterministic
    /// tests.
    pub fn with_clock_and_rng(config: TransportConfig, clock: C, rng: StdRng) -> Result<Self> {
        config.validate()?;
        let sender = ReliableSender::new(config.window, config.mss);
        let receiver = ReliableReceiver::new(config.recv_window, config.sack_enabled);
        Ok(Self {
            config,
            clock,
            rng,
            socket: None,
            peer: None,
            closed: false,
            sender,
            receiver,
            unreliable: UnreliablePath::new(),
            feedback: VecDeque::new(),
            wire_buf: BytesMut::with_capacity(RECV_BUF_LEN),
            stats: TransportStats::default(),
        })
    }

    /// Bind the local UDP socket.
    pub async fn bind(&mut self, addr: SocketAddr) -> Result<()> {
        self.ensure_open()?;
        if self.socket.is_some() {
            return Err(Error::InvalidState("transport is already bound"));
        }
        let socket = UdpSocket::bind(addr).await?;
        debug!(local = %socket.local_addr()?, "bound");
        self.socket = Some(socket);
        Ok(())
    }

    /// Set the remote peer, binding an ephemeral local socket if none exists.
    pub async fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        self.ensure_open()?;
        if self.peer.is_some() {
            return Err(Error::InvalidState("transport is already connected"));
        }
        if self.socket.is_none() {
            let socket = UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0)).await?;
            self.socket = Some(socket);
        }
        debug!(peer = %addr, "connected");
        self.peer = Some(addr);
        Ok(())
    }

    /// Accept bytes for transmission.
    ///
    /// Each MSS-sized segmentation unit independently draws its channel:
    /// reliable with probability `prob_reliable`, else unreliable. Returns
    /// how many bytes were accepted, which is less than `data.len()` once
    /// the reliable backlog reaches `W · MSS` bytes.
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let peer = self
            .peer
            .ok_or(Error::InvalidState("transport is not connected"))?;
        let now = self.clock.now_ms();

        let mut accepted = 0;
        for chunk in data.chunks(self.config.mss.max(1)) {
            let reliable = self.rng.gen::<f64>() < self.config.prob_reliable;
            if reliable {
                if self
                    .sender
                    .try_enqueue(Bytes::copy_from_slice(chunk))
                    .is_none()
                {
                    break;
                }
            } else {
                let pkt = self
                    .unreliable
                    .next_packet(Bytes::copy_from_slice(chunk), now);
                self.send_frame(&pkt, peer)?;
                self.stats.unreliable_tx += 1;
            }
            accepted += chunk.len();
        }

        self.flush_reliable(now)?;
        Ok(accepted)
    }

    /// Take up to `max_bytes` of the contiguous reliable byte stream.
    pub fn recv(&mut self, max_bytes: usize) -> Result<Bytes> {
        self.ensure_open()?;
        Ok(self.receiver.pop_deliverable(max_bytes))
    }

    /// Pop one payload from the unreliable delivery queue.
    pub fn recv_unreliable(&mut self) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        Ok(self.unreliable.pop_deliverable())
    }

    /// Run one poll step: flush due segments, read the socket for at most
    /// `timeout_ms`, route inbound frames, and emit queued feedback.
    pub async fn poll(&mut self, timeout_ms: u64) -> Result<()> {
        self.ensure_open()?;
        let now = self.clock.now_ms();
        self.flush_reliable(now)?;

        let mut buf = [0u8; RECV_BUF_LEN];
        let first = {
            let Some(socket) = &self.socket else {
                return Ok(());
            };
            timeout(Duration::from_millis(timeout_ms), socket.recv_from(&mut buf)).await
        };

        match first {
            Err(_elapsed) => {}
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok((n, src))) => {
                let now = self.clock.now_ms();
                self.handle_datagram(&buf[..n], src, now)?;
                // Drain whatever else is already queued, without waiting.
                loop {
                    let next = match &self.socket {
                        Some(socket) => socket.try_recv_from(&mut buf),
                        None => break,
                    };
                    match next {
                        Ok((n, src)) => self.handle_datagram(&buf[..n], src, now)?,
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        self.flush_feedback()?;
        self.flush_reliable(self.clock.now_ms())?;
        Ok(())
    }

    /// Poll in bounded slices until every reliable segment is acknowledged.
    pub async fn drain(&mut self) -> Result<()> {
        self.ensure_open()?;
        while !self.sender.is_drained() {
            self.poll(DRAIN_POLL_SLICE_MS).await?;
        }
        Ok(())
    }

    /// Like [`drain`](Self::drain), but give up after `limit`.
    pub async fn drain_deadline(&mut self, limit: Duration) -> Result<()> {
        self.ensure_open()?;
        let limit_ms = limit.as_millis() as u64;
        let deadline = self.clock.now_ms() + limit_ms;
        while !self.sender.is_drained() {
            let now = self.clock.now_ms();
            if now >= deadline {
                return Err(Error::Timeout(limit_ms));
            }
            let slice = DRAIN_POLL_SLICE_MS.min(deadline - now);
            self.poll(slice).await?;
        }
        Ok(())
    }

    /// Release the socket. Any in-flight segments are abandoned; the peer
    /// will observe a timeout. Subsequent operations fail, `close` itself is
    /// idempotent.
    pub fn close(&mut self) {
        self.socket = None;
        self.closed = true;
    }

    /// Link-level counters.
    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Reliable-sender RTT estimate and counters.
    pub fn sender_metrics(&self) -> SenderMetrics {
        self.sender.metrics()
    }

    /// True when every accepted reliable segment has been acknowledged.
    pub fn is_drained(&self) -> bool {
        self.sender.is_drained()
    }

    /// Reliable DATA frames the receive side has processed.
    pub fn segments_received(&self) -> u64 {
        self.receiver.segments_received()
    }

    /// Unreliable datagrams received.
    pub fn unreliable_received(&self) -> u64 {
        self.unreliable.datagrams_received()
    }

    /// Local socket address, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Remote peer, once connected or learned.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState("transport is closed"));
        }
        Ok(())
    }

    /// Decode, count, and route one inbound datagram. Malformed frames are
    /// absorbed here and never surface to the caller.
    fn handle_datagram(&mut self, frame: &[u8], src: SocketAddr, now: u64) -> Result<()> {
        self.stats.frames_rx += 1;
        self.stats.bytes_rx += frame.len() as u64;

        let pkt = match Packet::decode(frame) {
            Ok(pkt) => pkt,
            Err(err) => {
                self.stats.malformed += 1;
                trace!(%src, %err, "dropped malformed datagram");
                return Ok(());
            }
        };

        if self.config.verbose {
            debug!(
                ty = ?pkt.packet_type,
                channel = ?pkt.channel,
                seq = pkt.seq,
                len = pkt.payload.len(),
                %src,
                "rx"
            );
        }

        // A bound-but-unconnected endpoint adopts the first DATA source as
        // its peer, so feedback and later sends have a destination.
        if self.peer.is_none() && pkt.packet_type == PacketType::Data {
            debug!(peer = %src, "learned peer");
            self.peer = Some(src);
        }

        match (pkt.packet_type, pkt.channel) {
            (PacketType::Data, ChannelType::Reliable) => {
                self.stats.data_rx += 1;
                let fb = self.receiver.on_data(&pkt);
                self.feedback.push_back((fb, src));
            }
            (PacketType::Data, ChannelType::Unreliable) => {
                self.stats.unreliable_rx += 1;
                self.unreliable.on_data(&pkt);
            }
            (PacketType::Ack, _) | (PacketType::Sack, _) => {
                if pkt.packet_type == PacketType::Ack {
                    self.stats.acks_rx += 1;
                } else {
                    self.stats.sacks_rx += 1;
                }
                let repairs = self.sender.on_feedback(&pkt, now);
                let dst = self.peer.unwrap_or(src);
                for repair in repairs {
                    self.send_frame(&repair, dst)?;
                }
            }
        }
        Ok(())
    }

    fn flush_reliable(&mut self, now: u64) -> Result<()> {
        let Some(peer) = self.peer else {
            return Ok(());
        };
        if self.socket.is_none() {
            return Ok(());
        }
        for pkt in self.sender.due_packets(now) {
            self.send_frame(&pkt, peer)?;
        }
        Ok(())
    }

    fn flush_feedback(&mut self) -> Result<()> {
        while let Some((pkt, dst)) = self.feedback.pop_front() {
            match pkt.packet_type {
                PacketType::Ack => self.stats.acks_tx += 1,
                PacketType::Sack => self.stats.sacks_tx += 1,
                PacketType::Data => {}
            }
            self.send_frame(&pkt, dst)?;
        }
        Ok(())
    }

    /// Encode into the reusable wire buffer and hand the frame to the
    /// socket without blocking. A refused send is tolerated: reliable
    /// segments are re-covered by their timers, everything else is
    /// expendable.
    fn send_frame(&mut self, pkt: &Packet, dst: SocketAddr) -> Result<()> {
        self.wire_buf.clear();
        pkt.encode_into(&mut self.wire_buf)?;

        let socket = self
            .socket
            .as_ref()
            .ok_or(Error::InvalidState("transport has no socket"))?;
        match socket.try_send_to(&self.wire_buf, dst) {
            Ok(n) => {
                self.stats.frames_tx += 1;
                self.stats.bytes_tx += n as u64;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                self.stats.send_would_block += 1;
                trace!(%dst, "socket send would block, frame skipped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
