//! Command-line argument definitions (clap).

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "idrac-controller")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dell iDRAC fan control daemon with Home Assistant MQTT discovery", long_about = None)]
pub struct Args {
    /// Path to the JSON configuration file (default: config.json next to
    /// the executable)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Set log level (TRACE, DEBUG, INFO, WARN, ERROR); overrides LOG_LEVEL
    /// env and the config file
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// One-shot mode: poll each enabled server once, print readings as
    /// JSON, exit without touching fan control
    #[arg(long)]
    pub test: bool,

    /// Log fan control commands instead of issuing raw IPMI writes
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}
