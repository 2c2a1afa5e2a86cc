//! DCTP receiver driver.
//!
//! Binds a UDP port, writes the reliable byte stream (and any unreliable
//! datagrams) to a file, and reports statistics on Ctrl+C.
//!
//! ```text
//! dctp-recv --listen 127.0.0.1:9001 --out out.bin --sack -v
//! ```

use std::fs::File;
use std::io::Write;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use dctp::transport::DEFAULT_WINDOW;
use dctp::{Transport, TransportConfig};

/// Receive DCTP traffic and write it to a file.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// HOST:PORT to bind
    #[arg(long, value_parser = resolve_addr)]
    listen: SocketAddr,

    /// Output file path
    #[arg(long)]
    out: PathBuf,

    /// Receive window (reorder capacity) in segments
    #[arg(long, default_value_t = DEFAULT_WINDOW)]
    win: u32,

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
        recv_window: args.win,
        // This side only acknowledges; its own sends would all be reliable.
        prob_reliable: 1.0,
        sack_enabled: args.sack || !args.no_sack,
        verbose: args.verbose,
        ..Default::default()
    };

    let mut transport = Transport::new(config)?;
    transport.bind(args.listen).await?;

    let mut out = File::create(&args.out)?;
    let mut total = 0usize;
    let started = Instant::now();

    tracing::info!(listen = %args.listen, out = %args.out.display(), "receiving; Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            polled = transport.poll(25) => polled?,
        }

        let chunk = transport.recv(1 << 20)?;
        if !chunk.is_empty() {
            out.write_all(&chunk)?;
            total += chunk.len();
        }
        while let Some(datagram) = transport.recv_unreliable()? {
            out.write_all(&datagram)?;
            total += datagram.len();
        }
    }

    // Flush anything delivered but not yet read when the signal landed.
    let chunk = transport.recv(1 << 20)?;
    if !chunk.is_empty() {
        out.write_all(&chunk)?;
        total += chunk.len();
    }
    while let Some(datagram) = transport.recv_unreliable()? {
        out.write_all(&datagram)?;
        total += datagram.len();
    }
    out.flush()?;

    let elapsed = started.elapsed().as_secs_f64().max(1e-6);
    let mbps = (total as f64 * 8.0) / (elapsed * 1_000_000.0);
    tracing::info!(
        reliable_segments = transport.segments_received(),
        unreliable_datagrams = transport.unreliable_received(),
        "done: {total} bytes in {elapsed:.3}s ({mbps:.3} Mb/s)"
    );
    tracing::info!("link: {}", transport.stats().summary());

    transport.close();
    Ok(())
}
