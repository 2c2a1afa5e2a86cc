//! DCTP sender driver.
//!
//! Sends a stream of numbered payloads at a fixed rate, then drains the
//! reliable window and reports link statistics and sender metrics.
//!
//! ```text
//! dctp-send --dst 127.0.0.1:9001 --num-packets 300 --rate 50 --prob-reliable 0.5 --sack -v
//! ```

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use clap::Parser;
use dctp::transport::{DEFAULT_PROB_RELIABLE, DEFAULT_WINDOW};
use dctp::{Transport, TransportConfig};

/// Send data over DCTP to a receiver.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Destination HOST:PORT
    #[arg(long, value_parser = resolve_addr)]
    dst: SocketAddr,

    /// Number of application payloads to send
    #[arg(long, default_value_t = 300)]
    num_packets: u32,

    /// Payloads per second
    #[arg(long, default_value_t = 50.0)]
    rate: f64,

    /// Sender window in segments
    #[arg(long, default_value_t = DEFAULT_WINDOW)]
    win: u32,

    /// Probability in [0, 1] that a segment rides the reliable channel
    #[arg(long, default_value_t = DEFAULT_PROB_RELIABLE)]
    prob_reliable: f64,

    /// Enable selective acknowledgments (the default)
    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with = "no_sack")]
    sack: bool,

    /// Disable selective acknowledgments
    #[arg(long = "no-sack", action = clap::ArgAction::SetTrue)]
    no_sack: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn resolve_addr(s: &str) -> Result<SocketAddr, String> {
    s.to_socket_addrs()
        .map_err(|e| format!("cannot resolve {s}: {e}"))?
        .next()
        .ok_or_else(|| format!("no address for {s}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .init();

    let config = TransportConfig {
        window: args.win,
        prob_reliable: args.prob_reliable.clamp(0.0, 1.0),
        sack_enabled: args.sack || !args.no_sack,
        recv_window: args.win,
        verbose: args.verbose,
        ..Default::default()
    };

    let mut transport = Transport::new(config)?;
    transport.connect(args.dst).await?;

    let interval = Duration::from_secs_f64(1.0 / args.rate.max(0.001));
    let started = Instant::now();
    let mut queued_bytes = 0usize;

    tracing::info!(
        dst = %args.dst,
        packets = args.num_packets,
        rate = args.rate,
        "sending"
    );

    for i in 0..args.num_packets {
        let payload = format!("Packet {}", i + 1);
        let mut rest: &[u8] = payload.as_bytes();
        queued_bytes += rest.len();

        // When the reliable backlog is full, lend the transport poll time
        // until the remainder fits.
        loop {
            let accepted = transport.send(rest)?;
            rest = &rest[accepted..];
            if rest.is_empty() {
                break;
            }
            transport.poll(10).await?;
        }

        transport.poll(0).await?;
        tokio::time::sleep(interval).await;
    }

    transport.drain_deadline(Duration::from_secs(60)).await?;

    let elapsed = started.elapsed().as_secs_f64().max(1e-6);
    let mbps = (queued_bytes as f64 * 8.0) / (elapsed * 1_000_000.0);
    tracing::info!("finished: {queued_bytes} bytes in {elapsed:.3}s ({mbps:.3} Mb/s)");
    tracing::info!("link: {}", transport.stats().summary());

    let m = transport.sender_metrics();
    tracing::info!(
        srtt_ms = ?m.srtt_ms,
        rttvar_ms = m.rttvar_ms,
        rto_ms = m.rto_ms,
        rtt_min_ms = ?m.rtt_min_ms,
        rtt_max_ms = ?m.rtt_max_ms,
        rtt_mean_ms = ?m.rtt_mean_ms,
        segments_sent = m.segments_sent,
        retransmits = m.retransmits,
        fast_repairs = m.fast_repairs,
        duplicate_acks = m.duplicate_acks,
        "sender metrics"
    );

    transport.close();
    Ok(())
}
