//! RLC Stress Test
//!
//! Runs two RLC instances against each other over an emulated lossy MAC
//! and prints a JSON report of what was sent, received and retransmitted.

mod config;
mod harness;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use config::StressConfig;
use harness::{Harness, HarnessArgs};
use layers::rlc::RlcConfig;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Am,
    Um,
}

/// RLC AM/UM stress test
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// RLC mode, ignored when a configuration file is given
    #[arg(short, long, value_enum, ignore_case = true, default_value = "am")]
    mode: Mode,

    /// Bearer configuration file (YAML or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Test duration in milliseconds
    #[arg(short, long, default_value = "5000")]
    duration: u64,

    /// Delay between generated SDUs in microseconds
    #[arg(long, default_value = "100")]
    sdu_gen_delay: u64,

    /// Delay between MAC transmission opportunities in microseconds
    #[arg(long, default_value = "10")]
    pdu_tx_delay: u64,

    /// Probability of dropping a PDU (0.0-1.0)
    #[arg(long, default_value = "0.1")]
    error_rate: f64,

    /// MAC opportunity size as a multiple of the SDU size, 0 for random
    #[arg(long, default_value = "0")]
    opp_sdu_ratio: f64,

    /// Periodically reestablish both instances
    #[arg(long)]
    reestablish: bool,

    /// Reestablishment period in milliseconds
    #[arg(long, default_value = "1000")]
    reestablish_period: u64,

    /// Only the first instance generates SDUs
    #[arg(long)]
    single_tx: bool,

    /// SDU size in bytes, 0 for random
    #[arg(long, default_value = "0")]
    sdu_size: usize,

    /// Random seed for loss and size decisions
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    if !(0.0..=1.0).contains(&args.error_rate) {
        bail!("error rate must be within 0.0 and 1.0, got {}", args.error_rate);
    }
    if args.opp_sdu_ratio < 0.0 {
        bail!("opportunity ratio must not be negative");
    }
    if args.reestablish && args.reestablish_period == 0 {
        bail!("reestablishment period must be positive");
    }
    if args.sdu_size > harness::MAX_SDU_SIZE {
        bail!("SDU size is limited to {} bytes", harness::MAX_SDU_SIZE);
    }

    let rlc_config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            StressConfig::from_file(path)?.rlc
        }
        None => match args.mode {
            Mode::Am => RlcConfig::default_am(),
            Mode::Um => RlcConfig::default_um(),
        },
    };
    info!("Bearer configuration: {:?}", rlc_config);

    let harness_args = HarnessArgs {
        duration: Duration::from_millis(args.duration),
        sdu_gen_delay: Duration::from_micros(args.sdu_gen_delay),
        pdu_tx_delay: Duration::from_micros(args.pdu_tx_delay),
        error_rate: args.error_rate,
        opp_sdu_ratio: args.opp_sdu_ratio,
        reestablish: args.reestablish,
        reestablish_period: Duration::from_millis(args.reestablish_period),
        single_tx: args.single_tx,
        sdu_size: args.sdu_size,
        seed: args.seed,
    };

    let harness = Harness::new(harness_args, rlc_config).await?;
    let report = harness.run().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    let corrupted = report.rlc1.corrupted_sdus + report.rlc2.corrupted_sdus;
    if corrupted > 0 {
        bail!("{} corrupted SDUs delivered", corrupted);
    }
    info!("RLC stress test completed");
    Ok(())
}
