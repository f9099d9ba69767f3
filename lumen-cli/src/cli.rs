//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lumen", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as worker process (internal use)
    #[command(hide = true)]
    Worker {
        /// Worker ID assigned by the pool
        #[arg(long, value_name = "ID")]
        worker_id: Option<String>,
    },

    /// Scan a directory for media files
    Scan {
        /// Directory to scan
        path: PathBuf,

        /// Only keep files with these extensions (repeatable)
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<String>,

        /// Do not descend into subdirectories
        #[arg(long)]
        no_recursive: bool,
    },

    /// Extract technical metadata from a media file
    Metadata {
        /// Media file to probe
        path: PathBuf,
    },

    /// Extract a still frame from a video
    Thumbnail {
        /// Source video
        video: PathBuf,

        /// Output image path
        output: PathBuf,

        /// Position of the frame in seconds
        #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
        at: f64,

        /// Scale the frame to this width, keeping the aspect ratio
        #[arg(long, value_name = "PIXELS")]
        width: Option<u32>,
    },

    /// Inspect and work the persisted task backlog
    Queue {
        #[command(subcommand)]
        queue_cmd: QueueCommands,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show counts of the persisted backlog per priority
    Stats,

    /// List persisted tasks in dequeue order
    List,

    /// Add a task to the backlog
    Submit {
        /// Pool label: scan, thumbnail, metadata
        #[arg(long, value_name = "DOMAIN")]
        domain: String,

        /// JSON payload of the task
        #[arg(long, value_name = "JSON")]
        payload: String,

        /// Priority: critical, high, normal, low
        #[arg(long, value_name = "PRIORITY", default_value = "normal")]
        priority: String,
    },

    /// Run queued tasks through the worker pools until the backlog is empty
    Process {
        /// Stop after this many tasks
        #[arg(long, value_name = "COUNT")]
        limit: Option<usize>,
    },

    /// Cancel every queued task of one pool
    Cancel {
        /// Pool label: scan, thumbnail, metadata
        #[arg(long, value_name = "DOMAIN")]
        domain: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Print or write a sample configuration
    Sample {
        /// Output file path; stdout when omitted
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration in use
    Show {
        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },
}
