use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod error;
pub mod handler;
pub mod output;

/// recq - fetch recorded artifacts through a bounded download queue
#[derive(Parser, Debug)]
#[command(name = "recq")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Override config directory path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (TRACE level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download one or more urls and wait until the queue is idle
    Fetch {
        /// URLs to download
        #[arg(required = true)]
        urls: Vec<String>,

        /// Directory to save into (default: download.directory)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Maximum concurrent downloads (default: download.max_concurrent)
        #[arg(short = 'j', long, value_name = "N")]
        jobs: Option<usize>,

        /// Extra request header, e.g. "Authorization: Bearer ..."
        #[arg(short = 'H', long = "header", value_name = "HEADER")]
        headers: Vec<String>,

        /// Filename to save as (only with a single url)
        #[arg(long, value_name = "FILE")]
        name: Option<String>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        /// Configuration action
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show all configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the path of settings.toml
    Path,

    /// Write a settings.toml with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
