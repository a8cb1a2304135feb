mod info;
mod listen;
mod replay;
mod sinks;

use std::io::stderr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use aischomp::source::Parity;
use aischomp::{SerialConfig, UdpSource};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use listen::{listen, ListenArgs};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy)]
enum ParityArg {
    None,
    Odd,
    Even,
}

impl clap::ValueEnum for ParityArg {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::None, Self::Odd, Self::Even]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::None => Some(clap::builder::PossibleValue::new("none")),
            Self::Odd => Some(clap::builder::PossibleValue::new("odd")),
            Self::Even => Some(clap::builder::PossibleValue::new("even")),
        }
    }
}

impl From<ParityArg> for Parity {
    fn from(value: ParityArg) -> Self {
        match value {
            ParityArg::None => Parity::None,
            ParityArg::Odd => Parity::Odd,
            ParityArg::Even => Parity::Even,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for AIS sentences arriving as UDP datagrams.
    ///
    /// Each datagram is one record. Runs until killed.
    Udp {
        /// Local port to listen on.
        #[arg(short, long)]
        port: u16,

        /// Local address to bind.
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Receive buffer size. Longer datagrams are truncated.
        #[arg(long, default_value_t = UdpSource::DEFAULT_BUFFER_SIZE, value_name = "bytes")]
        buffer_size: usize,

        #[command(flatten)]
        listen: ListenArgs,
    },
    /// Read AIS sentences from a serial device, one per line.
    ///
    /// Exits with an error when the device goes away.
    Serial {
        /// Serial device path, e.g., /dev/ttyUSB0
        device: String,

        #[arg(short, long, default_value_t = SerialConfig::DEFAULT_BAUD_RATE)]
        baud: u32,

        /// Bits per character, 5 through 8.
        #[arg(long, default_value_t = 8)]
        data_bits: u8,

        #[arg(long, default_value = "none")]
        parity: ParityArg,

        /// 1 or 2
        #[arg(long, default_value_t = 1)]
        stop_bits: u8,

        #[command(flatten)]
        listen: ListenArgs,
    },
    /// Summarize a file of captured sentences, one per line.
    Info {
        /// Capture file
        input: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: info::Format,
    },
    /// Send the lines of a capture file as UDP datagrams, or over a pseudo-terminal.
    ///
    /// Useful for feeding a listening instance with known data.
    Replay {
        /// Capture file
        input: PathBuf,

        /// Destination address.
        #[arg(short, long, default_value = "127.0.0.1:4001")]
        target: SocketAddr,

        /// Seconds to wait before each datagram.
        #[arg(short, long, default_value_t = 1.0, value_name = "secs")]
        interval: f64,

        /// Start over at the beginning of the file after the last line.
        #[arg(long, action)]
        forever: bool,

        /// Write to a new pseudo-terminal instead of sending datagrams. The device path to
        /// listen on is logged at startup.
        #[arg(long, action, conflicts_with = "target")]
        serial: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("AISCHOMP_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Udp {
            port,
            bind,
            buffer_size,
            listen: args,
        } => {
            let source = UdpSource::bind((bind.as_str(), port))
                .with_context(|| format!("binding {bind}:{port}"))?
                .with_buffer_size(buffer_size);
            listen(source, &args)
        }
        Commands::Serial {
            device,
            baud,
            data_bits,
            parity,
            stop_bits,
            listen: args,
        } => {
            let source = SerialConfig::new(&device)
                .with_baud_rate(baud)
                .with_data_bits(data_bits)
                .with_parity(parity.into())
                .with_stop_bits(stop_bits)
                .open()
                .with_context(|| format!("opening {device}"))?;
            listen(source, &args)
        }
        Commands::Info { input, format } => info::info(&input, &format),
        Commands::Replay {
            input,
            target,
            interval,
            forever,
            serial,
        } => {
            let interval = Duration::try_from_secs_f64(interval).context("invalid interval")?;
            if serial {
                let sent = replay::replay_pty(&input, interval, forever)?;
                info!("wrote {sent} sentences");
                return Ok(());
            }
            let sent = replay::replay(&input, target, interval, forever)?;
            info!("sent {sent} datagrams");
            Ok(())
        }
    }
}
