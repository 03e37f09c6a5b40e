//! Tunnel filter CLI: opens a TUN device and runs the filtering read loop.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tunfilter::{FilterConfig, TunDevice, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = "tunfilter")]
#[command(about = "TUN device packet filter with pcap capture")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// TUN interface name (kernel-assigned when omitted)
    #[arg(short, long)]
    name: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with env overrides
    // Priority: RUST_LOG (standard), then RUST_LOG_LEVEL (custom, e.g., "debug"), then --verbose flag
    let fallback = if cli.verbose { "debug" } else { "info" };
    let default_level = std::env::var("RUST_LOG_LEVEL").unwrap_or_else(|_| fallback.to_string());
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level.clone()))
        .unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).without_time())
        .try_init()
        .ok();

    let config = if Path::new(&cli.config).exists() {
        info!("Loading configuration from: {}", cli.config);
        FilterConfig::from_file(&cli.config)
            .with_context(|| format!("Failed to load configuration from: {}", cli.config))?
    } else {
        info!("No configuration at {}, filtering disabled", cli.config);
        FilterConfig::default()
    };

    run(cli.name.as_deref(), &config)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn run(name: Option<&str>, config: &FilterConfig) -> Result<()> {
    use std::sync::Arc;
    use tunfilter::{
        AllowAll, BlockList, ConnectionPolicy, FdTun, NoCapture, PacketPolicy, PacketSink,
        PcapWriter, TunnelAdapter, DEFAULT_MTU,
    };

    /// Room left in front of each packet, as a forwarding loop would for its own header.
    const HEADROOM: usize = 16;

    let device = FdTun::open(name).context("Failed to create TUN device")?;

    let sink: Arc<dyn PacketSink> = match &config.capture {
        Some(capture) => Arc::new(PcapWriter::open(capture)?),
        None => Arc::new(NoCapture),
    };

    let block_list = BlockList::from_config(&config.policy);
    let policy: Arc<dyn PacketPolicy> = if block_list.is_empty() {
        Arc::new(AllowAll)
    } else {
        Arc::new(ConnectionPolicy::new(block_list))
    };

    let mut adapter = TunnelAdapter::new(device, policy, sink);
    let name = adapter.name()?;
    let mtu = adapter.mtu().unwrap_or(DEFAULT_MTU);
    info!("Filtering {} (mtu {})", name, mtu);

    if let Some(mut events) = adapter.events() {
        std::thread::spawn(move || {
            while let Some(event) = events.blocking_recv() {
                info!(?event, "TUN event");
            }
        });
    }

    forward_loop(&mut adapter, HEADROOM, mtu)
}

/// Read packets until the device fails, then close it.
///
/// Blocked packets show up as zero-length reads and are only counted.
fn forward_loop<D: TunDevice>(device: &mut D, headroom: usize, mtu: usize) -> Result<()> {
    let name = device.name().unwrap_or_default();
    let mut buf = vec![0u8; headroom + mtu];
    let mut forwarded: u64 = 0;
    let mut blocked: u64 = 0;

    loop {
        match device.read(&mut buf, headroom) {
            Ok(0) => blocked += 1,
            Ok(n) => {
                forwarded += 1;
                debug!(len = n, "Packet received from TUN");
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                info!("Forwarded {} packets, blocked {}", forwarded, blocked);
                if let Err(close_err) = device.close() {
                    warn!("Failed to close {}: {}", name, close_err);
                }
                return Err(e).context("Failed to read from TUN");
            }
        }

        if (forwarded + blocked) % 1000 == 0 {
            info!("Forwarded {} packets, blocked {}", forwarded, blocked);
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn run(_name: Option<&str>, _config: &FilterConfig) -> Result<()> {
    anyhow::bail!("TUN devices are only supported on Linux and Android")
}
