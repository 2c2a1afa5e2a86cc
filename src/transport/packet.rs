//! Packet framing and serialization.
//!
//! Defines the wire format for transport frames. All multi-byte integers are
//! big-endian.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Type (1) │ Channel (1) │ Seq (4) │ Timestamp (4)             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Length (2) │ Checksum (2)                                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ ACK/SACK only: Ack (4) │ Recv Window (2) │ Echo Ts (4)       │
//! ├──────────────────────────────────────────────────────────────┤
//! │ SACK only: Num Blocks (2) │ (Start (4), End (4)) × N         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ DATA only: Payload (variable)                                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The checksum is the 16-bit ones'-complement sum over the whole datagram
//! with the checksum field taken as zero. No I/O happens here; this is pure
//! data transformation.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::transport::seq::seq_le;

/// Packet types in the transport protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Data segment with payload
    Data = 0x01,
    /// Cumulative acknowledgment with flow control
    Ack = 0x02,
    /// Cumulative acknowledgment plus selective-ack blocks
    Sack = 0x03,
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(PacketType::Data),
            0x02 => Ok(PacketType::Ack),
            0x03 => Ok(PacketType::Sack),
            _ => Err(Error::malformed(format!("unknown packet type: {value:#04x}"))),
        }
    }
}

/// Delivery service a frame belongs to.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    /// Fire-and-forget, no feedback, no ordering
    Unreliable = 0x00,
    /// In-order delivery with retransmission
    Reliable = 0x01,
}

impl TryFrom<u8> for ChannelType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(ChannelType::Unreliable),
            0x01 => Ok(ChannelType::Reliable),
            _ => Err(Error::malformed(format!("unknown channel type: {value:#04x}"))),
        }
    }
}

/// One selective-ack block: the closed range `[start, end]` of sequence
/// numbers the receiver holds above its contiguous frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackBlock {
    /// First sequence in the range (inclusive)
    pub start: u32,
    /// Last sequence in the range (inclusive)
    pub end: u32,
}

impl SackBlock {
    /// Create a block covering `[start, end]`.
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// True iff `seq` lies inside this block (serial order).
    pub fn contains(&self, seq: u32) -> bool {
        seq_le(self.start, seq) && seq_le(seq, self.end)
    }
}

/// Base header size in bytes
pub const BASE_HEADER_LEN: usize = 14;
/// Feedback block size appended to ACK and SACK frames
pub const FEEDBACK_BLOCK_LEN: usize = 10;
/// Size of one encoded SACK block
pub const SACK_BLOCK_LEN: usize = 8;
/// Byte offset of the checksum field within the base header
const CHECKSUM_OFFSET: usize = 12;
/// Upper bound on SACK blocks a frame may carry
pub const MAX_SACK_BLOCKS: usize = 32;
/// Largest datagram the protocol emits; stays under the common Ethernet MTU
/// without IP fragmentation
pub const MAX_DATAGRAM_LEN: usize = 1472;
/// Largest payload a DATA frame can carry
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM_LEN - BASE_HEADER_LEN;

/// A transport frame.
///
/// Feedback fields (`ack`, `recv_window`, `echo_timestamp`, `sack`) are only
/// meaningful on ACK/SACK frames; `payload` only on DATA frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Frame type
    pub packet_type: PacketType,
    /// Channel the frame belongs to
    pub channel: ChannelType,
    /// Sequence number (for feedback frames: the receiver's `rcv_base`)
    pub seq: u32,
    /// Sender's monotonic milliseconds at first transmission
    pub timestamp: u32,
    /// Payload data (empty on feedback frames)
    pub payload: Bytes,
    /// Cumulative next-expected sequence
    pub ack: u32,
    /// Advertised free reorder slots
    pub recv_window: u16,
    /// Echo of the acknowledged frame's timestamp
    pub echo_timestamp: u32,
    /// Selective-ack blocks, strictly above `ack`
    pub sack: Vec<SackBlock>,
}

impl Packet {
    /// Create a DATA frame.
    pub fn data(channel: ChannelType, seq: u32, timestamp: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            packet_type: PacketType::Data,
            channel,
            seq,
            timestamp,
            payload: payload.into(),
            ack: 0,
            recv_window: 0,
            echo_timestamp: 0,
            sack: Vec::new(),
        }
    }

    /// Create a cumulative ACK frame.
    pub fn ack(ack: u32, recv_window: u16, echo_timestamp: u32) -> Self {
        Self {
            packet_type: PacketType::Ack,
            channel: ChannelType::Reliable,
            seq: ack,
            timestamp: 0,
            payload: Bytes::new(),
            ack,
            recv_window,
            echo_timestamp,
            sack: Vec::new(),
        }
    }

    /// Create a SACK frame.
    pub fn sack(ack: u32, recv_window: u16, echo_timestamp: u32, sack: Vec<SackBlock>) -> Self {
        Self {
            packet_type: PacketType::Sack,
            channel: ChannelType::Reliable,
            seq: ack,
            timestamp: 0,
            payload: Bytes::new(),
            ack,
            recv_window,
            echo_timestamp,
            sack,
        }
    }

    /// True for ACK and SACK frames.
    pub fn is_feedback(&self) -> bool {
        matches!(self.packet_type, PacketType::Ack | PacketType::Sack)
    }

    /// Total encoded size of this frame.
    pub fn wire_size(&self) -> usize {
        let mut size = BASE_HEADER_LEN + self.payload.len();
        if self.is_feedback() {
            size += FEEDBACK_BLOCK_LEN;
        }
        if self.packet_type == PacketType::Sack {
            size += 2 + self.sack.len() * SACK_BLOCK_LEN;
        }
        size
    }

    /// Serialize this frame into `buf`, appending `wire_size()` bytes.
    ///
    /// The caller owns the buffer so the hot path does not allocate.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        self.validate_for_encode()?;

        let start = buf.len();
        buf.reserve(self.wire_size());

        buf.put_u8(self.packet_type as u8);
        buf.put_u8(self.channel as u8);
        buf.put_u32(self.seq);
        buf.put_u32(self.timestamp);
        let length = match self.packet_type {
            PacketType::Data => self.payload.len() as u16,
            _ => 0,
        };
        buf.put_u16(length);
        buf.put_u16(0); // checksum, patched below

        if self.is_feedback() {
            buf.put_u32(self.ack);
            buf.put_u16(self.recv_window);
            buf.put_u32(self.echo_timestamp);
        }
        if self.packet_type == PacketType::Sack {
            buf.put_u16(self.sack.len() as u16);
            for block in &self.sack {
                buf.put_u32(block.start);
                buf.put_u32(block.end);
            }
        }
        buf.put_slice(&self.payload);

        let ck = frame_checksum(&buf[start..]);
        buf[start + CHECKSUM_OFFSET..start + CHECKSUM_OFFSET + 2]
            .copy_from_slice(&ck.to_be_bytes());
        Ok(())
    }

    /// Serialize this frame into a freshly allocated buffer.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse and validate a received datagram.
    ///
    /// Any inconsistency (truncation, unknown type or channel bytes, length
    /// disagreement, SACK overflow, checksum mismatch) yields
    /// [`Error::Malformed`]; the caller drops and counts such frames.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < BASE_HEADER_LEN {
            return Err(Error::malformed(format!(
                "frame too short: {} < {BASE_HEADER_LEN}",
                frame.len()
            )));
        }

        let mut cursor = frame;
        let packet_type = PacketType::try_from(cursor.get_u8())?;
        let channel = ChannelType::try_from(cursor.get_u8())?;
        let seq = cursor.get_u32();
        let timestamp = cursor.get_u32();
        let length = cursor.get_u16() as usize;
        let wire_checksum = cursor.get_u16();

        let mut ack = 0;
        let mut recv_window = 0;
        let mut echo_timestamp = 0;
        let mut sack = Vec::new();

        if packet_type != PacketType::Data {
            if length != 0 {
                return Err(Error::malformed("feedback frame with nonzero length"));
            }
            if cursor.remaining() < FEEDBACK_BLOCK_LEN {
                return Err(Error::malformed("truncated feedback block"));
            }
            ack = cursor.get_u32();
            recv_window = cursor.get_u16();
            echo_timestamp = cursor.get_u32();
        }
        if packet_type == PacketType::Sack {
            if cursor.remaining() < 2 {
                return Err(Error::malformed("truncated SACK header"));
            }
            let num_blocks = cursor.get_u16() as usize;
            if num_blocks > MAX_SACK_BLOCKS {
                return Err(Error::malformed(format!(
                    "SACK block count {num_blocks} exceeds {MAX_SACK_BLOCKS}"
                )));
            }
            if cursor.remaining() < num_blocks * SACK_BLOCK_LEN {
                return Err(Error::malformed("truncated SACK blocks"));
            }
            for _ in 0..num_blocks {
                let start = cursor.get_u32();
                let end = cursor.get_u32();
                if !seq_le(start, end) {
                    return Err(Error::malformed(format!(
                        "invalid SACK range [{start}, {end}]"
                    )));
                }
                sack.push(SackBlock::new(start, end));
            }
        }

        if cursor.remaining() != length {
            return Err(Error::malformed(format!(
                "length mismatch: header says {length}, frame carries {}",
                cursor.remaining()
            )));
        }
        let payload = Bytes::copy_from_slice(cursor);

        let expected = frame_checksum(frame);
        if wire_checksum != expected {
            return Err(Error::malformed("checksum mismatch"));
        }

        Ok(Self {
            packet_type,
            channel,
            seq,
            timestamp,
            payload,
            ack,
            recv_window,
            echo_timestamp,
            sack,
        })
    }

    fn validate_for_encode(&self) -> Result<()> {
        match self.packet_type {
            PacketType::Data => {
                if self.payload.len() > MAX_PAYLOAD {
                    return Err(Error::invalid_argument(format!(
                        "payload of {} bytes exceeds {MAX_PAYLOAD}",
                        self.payload.len()
                    )));
                }
            }
            PacketType::Ack | PacketType::Sack => {
                if !self.payload.is_empty() {
                    return Err(Error::invalid_argument("feedback frames carry no payload"));
                }
            }
        }
        if self.sack.len() > MAX_SACK_BLOCKS {
            return Err(Error::invalid_argument(format!(
                "{} SACK blocks exceed {MAX_SACK_BLOCKS}",
                self.sack.len()
            )));
        }
        for block in &self.sack {
            if !seq_le(block.start, block.end) {
                return Err(Error::invalid_argument(format!(
                    "invalid SACK range [{}, {}]",
                    block.start, block.end
                )));
            }
        }
        Ok(())
    }
}

/// 16-bit ones'-complement checksum over a frame, with the checksum field
/// taken as zero and odd-length frames padded with one zero byte.
pub fn frame_checksum(frame: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;
    while i < frame.len() {
        let hi = if i == CHECKSUM_OFFSET { 0 } else { frame[i] as u32 };
        let lo = if i + 1 >= frame.len() || i + 1 == CHECKSUM_OFFSET + 1 {
            0
        } else {
            frame[i + 1] as u32
        };
        sum += (hi << 8) | lo;
        sum = (sum & 0xFFFF) + (sum >> 16);
        i += 2;
    }
    !(sum as u16)
}
