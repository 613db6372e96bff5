//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding apps.json, top_apps.json and the encoded icons
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Use this serial port instead of searching by USB id
    #[arg(short, long, global = true)]
    pub port: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bridge until interrupted
    Run {
        /// One task per session: telemetry out, one command poll in, idle timeout
        #[arg(long)]
        single_exchange: bool,
    },
    /// List registered applications by score
    Apps,
    /// Show the top set last written for the device
    Top,
    /// List serial ports, marking the ones that match the device's USB id
    Ports,
    /// Print the effective configuration as TOML
    Config {
        /// Also write it to the configuration file
        #[arg(long)]
        write: bool,
    },
}
