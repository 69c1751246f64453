use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "overseer", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the storage data directory
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "overseer=info,warn")]
    pub log_level: String,

    /// Emit JSON log lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch all stored servers until interrupted (default)
    Run,

    /// Write a sample configuration
    Init {
        /// Output path (defaults to ~/.overseer/config.yaml)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Manage observed servers
    Servers {
        #[command(subcommand)]
        command: ServerCommands,
    },

    /// Manage watchlisted player names
    Watchlist {
        #[command(subcommand)]
        command: WatchlistCommands,
    },

    /// Choose where announcements go (a running daemon applies it on SIGHUP)
    Notify {
        #[command(subcommand)]
        command: NotifyCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ServerCommands {
    /// Register a server
    Add {
        #[arg(short, long)]
        name: String,
        /// Query endpoint, host:port
        #[arg(short, long)]
        addr: String,
    },
    /// List registered servers
    List,
    /// Remove a server by id or name
    Remove { server: String },
}

#[derive(Subcommand, Debug)]
pub enum WatchlistCommands {
    /// Watch a player name
    Add { name: String },
    /// List watched names
    List,
    /// Stop watching an entry
    Remove { id: Uuid },
}

#[derive(Subcommand, Debug)]
pub enum NotifyCommands {
    /// Announce to a Discord channel
    Discord {
        /// Bot token
        #[arg(long)]
        token: String,
        #[arg(long = "channel")]
        channel_id: String,
    },
    /// Stop announcing
    Off,
    /// Show the configured services
    Show,
}
