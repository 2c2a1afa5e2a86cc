//! Smoothed RTT tracking and retransmission-timeout computation.
//!
//! Follows the classic Jacobson/Karels estimator (RFC 6298 constants):
//!
//! ```text
//! first sample:  SRTT = R,  RTTVAR = R / 2
//! afterwards:    RTTVAR = 3/4 · RTTVAR + 1/4 · |SRTT − R|
//!                SRTT   = 7/8 · SRTT   + 1/8 · R
//! always:        RTO    = SRTT + max(G, 4 · RTTVAR)
//! ```
//!
//! Karn's rule (never sample a retransmitted segment) and per-segment
//! exponential backoff are enforced by the sender; this estimator only ever
//! sees clean samples.

/// Clock granularity `G` in milliseconds.
const CLOCK_GRANULARITY_MS: f64 = 1.0;

/// Lower clamp for the computed RTO.
pub const MIN_RTO_MS: u64 = 200;
/// Upper clamp for the computed RTO; also the cap for per-segment backoff.
pub const MAX_RTO_MS: u64 = 60_000;
/// RTO used before the first RTT sample arrives.
pub const INITIAL_RTO_MS: u64 = 1_000;

/// Smoothed RTT state and the derived retransmission timeout.
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    srtt: Option<f64>,
    rttvar: f64,
    rto_ms: u64,
}

impl RtoEstimator {
    /// Create an estimator with no samples yet.
    pub fn new() -> Self {
        Self {
            srtt: None,
            rttvar: 0.0,
            rto_ms: INITIAL_RTO_MS,
        }
    }

    /// Feed one clean RTT sample (milliseconds).
    pub fn on_sample(&mut self, rtt_ms: u64) {
        let r = rtt_ms.max(1) as f64;

        match self.srtt {
            None => {
                self.srtt = Some(r);
                self.rttvar = r / 2.0;
            }
            Some(srtt) => {
                self.rttvar = 0.75 * self.rttvar + 0.25 * (srtt - r).abs();
                self.srtt = Some(0.875 * srtt + 0.125 * r);
            }
        }

        let srtt = self.srtt.unwrap_or(r);
        let rto = srtt + (4.0 * self.rttvar).max(CLOCK_GRANULARITY_MS);
        self.rto_ms = (rto as u64).clamp(MIN_RTO_MS, MAX_RTO_MS);
    }

    /// Current retransmission timeout in milliseconds.
    pub fn rto_ms(&self) -> u64 {
        self.rto_ms
    }

    /// Smoothed RTT in milliseconds, if any sample has been taken.
    pub fn srtt_ms(&self) -> Option<u64> {
        self.srtt.map(|v| v as u64)
    }

    /// RTT variance in milliseconds.
    pub fn rttvar_ms(&self) -> u64 {
        self.rttvar as u64
    }

    /// True once at least one sample has been taken.
    pub fn has_sample(&self) -> bool {
        self.srtt.is_some()
    }
}

impl Default for RtoEstimator {
    fn default() -> Self {
        Self::new()
    }
}
