//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Family management commands.
#[derive(Debug, Subcommand)]
pub enum FamilyCommand {
    /// Create a family and print its code
    Create {
        /// User creating the family (becomes admin)
        #[arg(short, long)]
        user: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Join an existing family
    Join {
        /// Six-digit family code
        code: String,

        /// User joining
        #[arg(short, long)]
        user: String,
    },

    /// Leave a family
    Leave {
        /// Six-digit family code
        code: String,

        /// User leaving
        #[arg(short, long)]
        user: String,
    },

    /// Show a family and its members
    Show {
        /// Six-digit family code
        code: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

/// Status commands.
#[derive(Debug, Subcommand)]
pub enum StatusCommand {
    /// Set a member's status by hand
    Set {
        /// Six-digit family code
        code: String,

        /// Member whose status changes
        #[arg(short, long)]
        user: String,

        /// New status, e.g. "I'm Safe", "Evacuated", "Need Help"
        status: String,
    },
}

/// Monitor command arguments.
#[derive(Debug, Args)]
pub struct MonitorCommand {
    /// Six-digit family code
    pub code: String,

    /// Seconds between checks for writes made by other processes
    #[arg(long, default_value = "5")]
    pub poll_secs: u64,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        file: Option<PathBuf>,
    },
}
