use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nodeup_core::hex::HexLines;
use nodeup_core::session::{SessionConfig, UploadSession, enter_upgrade_mode};
use nodeup_core::transport::I2cLink;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Firmware upgrade tool for I2C bus nodes", long_about = None)]
struct Cli {
    /// I2C character device
    #[arg(short, long, default_value = "/dev/i2c-1")]
    device: String,

    /// Session configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Broadcast the enter-upgrade command to all nodes on the bus
    EnterUpgrade,
    /// Stream an Intel HEX image to one node's bootloader
    Upload {
        /// Target node address (1-127)
        #[arg(short, long)]
        address: u8,

        /// Intel HEX firmware image
        file: PathBuf,

        /// Abort after this many unanswered status polls per line
        /// (default: poll forever)
        #[arg(long)]
        status_poll_limit: Option<u32>,

        /// Delay between status polls in milliseconds
        #[arg(long)]
        poll_delay_ms: Option<u64>,

        /// Continue on unrecognized status bytes instead of aborting
        #[arg(long)]
        ignore_unknown_status: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(cli) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut link = I2cLink::open(&cli.device)
        .with_context(|| format!("could not open I2C interface {}", cli.device))?;

    let mut config = match &cli.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("could not load config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    match cli.command {
        Commands::EnterUpgrade => {
            enter_upgrade_mode(&mut link)?;
        }
        Commands::Upload {
            address,
            file,
            status_poll_limit,
            poll_delay_ms,
            ignore_unknown_status,
        } => {
            // Flags override the config file where given.
            if status_poll_limit.is_some() {
                config.status_poll_limit = status_poll_limit;
            }
            if let Some(delay) = poll_delay_ms {
                config.poll_delay_ms = delay;
            }
            if ignore_unknown_status {
                config.ignore_unknown_status = true;
            }

            let lines = HexLines::open(&file)
                .with_context(|| format!("could not open hex file {}", file.display()))?;

            info!(file = %file.display(), address, "Starting upload");
            let mut session = UploadSession::new(link, address, config);
            let stats = session.run(lines)?;
            info!(
                lines = stats.lines_sent,
                retries = stats.checksum_retries,
                bytes = stats.bytes_written,
                "Node reprogrammed"
            );
        }
    }

    Ok(())
}
