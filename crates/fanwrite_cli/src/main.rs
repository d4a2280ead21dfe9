//! fanwrite CLI
//!
//! Command-line front end for the fan-out line writer.
//!
//! # Commands
//!
//! - `split` - Fan `key<TAB>payload` lines out to per-key files
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Fan-out line writer tools.
#[derive(Parser)]
#[command(name = "fanwrite")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output directory for per-key files
    #[arg(global = true, short, long)]
    dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split keyed input lines into one file per key
    Split {
        /// Input file (reads stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Character separating the key from the payload
        #[arg(long, default_value = "\t")]
        delimiter: char,

        /// Maximum number of files kept open (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        max_open_files: usize,

        /// Write one file per key instead of numbered partitions
        #[arg(long)]
        no_partition: bool,

        /// Gzip-compress output files
        #[arg(short, long)]
        gzip: bool,

        /// Scan the directory for partition numbers only once per key
        #[arg(long)]
        scan_once: bool,

        /// Number of writer threads
        #[arg(short, long, default_value = "1")]
        threads: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Split {
            input,
            delimiter,
            max_open_files,
            no_partition,
            gzip,
            scan_once,
            threads,
            format,
        } => {
            let dir = cli.dir.ok_or("Output directory required for split")?;
            let options = commands::split::SplitOptions {
                delimiter,
                max_open_files,
                partitioned: !no_partition,
                gzip,
                scan_once,
                threads,
            };
            commands::split::run(&dir, input.as_deref(), &options, &format)?;
        }
        Commands::Version => {
            println!("fanwrite CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("fanwrite core v{}", fanwrite_core::VERSION);
        }
    }

    Ok(())
}
