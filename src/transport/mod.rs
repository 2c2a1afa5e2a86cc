//! Transport engine.
//!
//! Two delivery services multiplexed over one UDP socket:
//!
//! 1. **Reliable channel**: selective-repeat ARQ with cumulative and
//!    selective acknowledgments, per-segment retransmission timers, and
//!    Jacobson RTO estimation
//!
//! 2. **Unreliable channel**: fire-and-forget datagrams whose value decays
//!    with age
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 Application                     │
//! ├────────────────────────────────────────────────┤
//! │  Facade (socket, poll loop, channel routing)   │
//! ├───────────────────────┬────────────────────────┤
//! │  Reliable Sender      │  Reliable Receiver     │
//! │  (window, timers,     │  (reorder buffer,      │
//! │   SACK repair)        │   feedback builder)    │
//! ├───────────────────────┴────────────────────────┤
//! │  Unreliable Path (stateless relay)             │
//! ├────────────────────────────────────────────────┤
//! │  Packet Layer (framing, checksum)              │
//! └────────────────────────────────────────────────┘
//! ```

mod endpoint;
mod packet;
mod receiver;
mod rto;
mod sender;
pub mod seq;
mod stats;
mod unreliable;

pub use endpoint::Transport;
pub use packet::{
    ChannelType, Packet, PacketType, SackBlock, BASE_HEADER_LEN, FEEDBACK_BLOCK_LEN,
    MAX_DATAGRAM_LEN, MAX_PAYLOAD, MAX_SACK_BLOCKS, SACK_BLOCK_LEN,
};
pub use receiver::ReliableReceiver;
pub use rto::{RtoEstimator, INITIAL_RTO_MS, MAX_RTO_MS, MIN_RTO_MS};
pub use sender::{ReliableSender, SenderMetrics};
pub use stats::TransportStats;
pub use unreliable::UnreliablePath;

/// Default maximum segment size (payload bytes per DATA frame)
pub const DEFAULT_MSS: usize = 1024;

/// Default sender window and receiver reorder capacity, in segments
pub const DEFAULT_WINDOW: u32 = 64;

/// Default probability that a segmentation unit rides the reliable channel
pub const DEFAULT_PROB_RELIABLE: f64 = 0.5;

/// Windows must stay below 2^30 segments for serial comparisons to stay
/// unambiguous
pub const MAX_WINDOW: u32 = 1 << 30;

/// Most SACK blocks a feedback frame will carry
pub const SACK_MAX_BLOCKS: usize = 4;

/// Poll slice used by `drain`
pub const DRAIN_POLL_SLICE_MS: u64 = 50;

/// Transport layer configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Sender sliding-window size in segments; must lie in `[1, 2^30)`
    pub window: u32,
    /// Probability in `[0, 1]` that a segmentation unit is sent reliably
    pub prob_reliable: f64,
    /// Emit and honor selective acknowledgments
    pub sack_enabled: bool,
    /// Maximum payload bytes per DATA frame
    pub mss: usize,
    /// Receiver reorder capacity in segments; must lie in `[1, 2^30)`
    pub recv_window: u32,
    /// Log per-frame events at debug level
    pub verbose: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            prob_reliable: DEFAULT_PROB_RELIABLE,
            sack_enabled: true,
            mss: DEFAULT_MSS,
            recv_window: DEFAULT_WINDOW,
            verbose: false,
        }
    }
}

impl TransportConfig {
    /// Check every field against its documented range.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::Error;

        if self.window == 0 || self.window >= MAX_WINDOW {
            return Err(Error::invalid_argument(format!(
                "window {} outside [1, 2^30)",
                self.window
            )));
        }
        if self.recv_window == 0 || self.recv_window >= MAX_WINDOW {
            return Err(Error::invalid_argument(format!(
                "recv_window {} outside [1, 2^30)",
                self.recv_window
            )));
        }
        if !(0.0..=1.0).contains(&self.prob_reliable) {
            return Err(Error::invalid_argument(format!(
                "prob_reliable {} outside [0, 1]",
                self.prob_reliable
            )));
        }
        if self.mss == 0 || self.mss > MAX_PAYLOAD {
            return Err(Error::invalid_argument(format!(
                "mss {} outside [1, {MAX_PAYLOAD}]",
                self.mss
            )));
        }
        Ok(())
    }
}
