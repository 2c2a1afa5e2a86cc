//! # Dual-Channel Transport Protocol (DCTP)
//!
//! A user-space transport over UDP that multiplexes two delivery services
//! across a single 5-tuple:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Application Layer                     │
//! ├────────────────────────────┬────────────────────────────┤
//! │  Reliable channel          │  Unreliable channel        │
//! │  (selective repeat, SACK,  │  (fire-and-forget,         │
//! │   RTO timers, in-order)    │   latency-preferring)      │
//! ├────────────────────────────┴────────────────────────────┤
//! │  Framing & feedback protocol (checksum, ACK/SACK)       │
//! ├─────────────────────────────────────────────────────────┤
//! │  One UDP socket                                          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Goals
//!
//! 1. **Durable where it matters**: state-machine-critical bytes arrive
//!    exactly once, in order, under loss and reordering
//! 2. **Cheap where it doesn't**: best-effort updates skip every queue and
//!    timer the reliable path maintains
//! 3. **Cooperative**: single-threaded, no background tasks; the caller
//!    lends time and CPU through `poll`
//!
//! ## Example
//!
//! ```no_run
//! use dctp::{Transport, TransportConfig};
//!
//! # async fn run() -> dctp::Result<()> {
//! let mut t = Transport::new(TransportConfig::default())?;
//! t.connect("127.0.0.1:9001".parse().unwrap()).await?;
//! t.send(b"state update")?;
//! t.drain().await?;
//! t.close();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod clock;
pub mod error;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use transport::{Transport, TransportConfig};
