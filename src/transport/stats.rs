//! Link-level transport counters.
//!
//! Plain counters owned by the facade; the transport is single-threaded, so
//! no synchronization is involved. Sender-side RTT metrics live in
//! [`crate::transport::sender::SenderMetrics`].

/// Counters for everything that crossed (or failed to cross) the socket.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes handed to the socket
    pub bytes_tx: u64,
    /// Bytes read from the socket
    pub bytes_rx: u64,
    /// Datagrams handed to the socket
    pub frames_tx: u64,
    /// Datagrams read from the socket
    pub frames_rx: u64,
    /// ACK frames sent
    pub acks_tx: u64,
    /// ACK frames received
    pub acks_rx: u64,
    /// SACK frames sent
    pub sacks_tx: u64,
    /// SACK frames received
    pub sacks_rx: u64,
    /// Reliable DATA frames received
    pub data_rx: u64,
    /// Unreliable DATA frames received
    pub unreliable_rx: u64,
    /// Unreliable DATA frames sent
    pub unreliable_tx: u64,
    /// Datagrams dropped for failing structural or checksum validation
    pub malformed: u64,
    /// Outbound frames the socket refused without blocking
    pub send_would_block: u64,
}

impl TransportStats {
    /// One-line summary for end-of-run reports.
    pub fn summary(&self) -> String {
        format!(
            "tx {} frames / {} bytes, rx {} frames / {} bytes, \
             acks {}/{} sacks {}/{} (tx/rx), malformed {}",
            self.frames_tx,
            self.bytes_tx,
            self.frames_rx,
            self.bytes_rx,
            self.acks_tx,
            self.acks_rx,
            self.sacks_tx,
            self.sacks_rx,
            self.malformed,
        )
    }
}
