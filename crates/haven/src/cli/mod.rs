//! Command-line interface for haven.
//!
//! Operator commands that drive the engine against the local SQLite store.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, FamilyCommand, MonitorCommand, StatusCommand};

use crate::logging::Verbosity;

/// haven - Family presence and safety status
///
/// Creates families, records members' safety status and runs the escalation
/// monitor that marks silent members "Not Yet Responded" and then "Unknown".
#[derive(Debug, Parser)]
#[command(name = "haven")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create, join, leave or inspect families
    #[command(subcommand)]
    Family(FamilyCommand),

    /// Record a member's status
    #[command(subcommand)]
    Status(StatusCommand),

    /// Run the escalation monitor for a family until interrupted
    Monitor(MonitorCommand),

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn cli(verbose: u8, quiet: bool) -> Cli {
        Cli {
            config: None,
            verbose,
            quiet,
            command: Command::Config(ConfigCommand::Path),
        }
    }

    #[test]
    fn test_cli_name() {
        assert_eq!(Cli::command().get_name(), "haven");
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(cli(0, true).verbosity(), Verbosity::Quiet);
        assert_eq!(cli(3, true).verbosity(), Verbosity::Quiet);
        assert_eq!(cli(0, false).verbosity(), Verbosity::Normal);
        assert_eq!(cli(1, false).verbosity(), Verbosity::Verbose);
        assert_eq!(cli(2, false).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_family_create() {
        let cli = Cli::try_parse_from(["haven", "family", "create", "--user", "alice", "-n", "Tanaka"])
            .unwrap();
        match cli.command {
            Command::Family(FamilyCommand::Create { user, name }) => {
                assert_eq!(user, "alice");
                assert_eq!(name.as_deref(), Some("Tanaka"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_family_join_requires_user() {
        assert!(Cli::try_parse_from(["haven", "family", "join", "123456"]).is_err());
        let cli = Cli::try_parse_from(["haven", "family", "join", "123456", "-u", "bob"]).unwrap();
        assert!(matches!(cli.command, Command::Family(FamilyCommand::Join { .. })));
    }

    #[test]
    fn test_parse_status_set() {
        let cli = Cli::try_parse_from([
            "haven", "status", "set", "123456", "--user", "alice", "I'm Safe",
        ])
        .unwrap();
        match cli.command {
            Command::Status(StatusCommand::Set { code, user, status }) => {
                assert_eq!(code, "123456");
                assert_eq!(user, "alice");
                assert_eq!(status, "I'm Safe");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_monitor_default_poll() {
        let cli = Cli::try_parse_from(["haven", "monitor", "123456"]).unwrap();
        match cli.command {
            Command::Monitor(cmd) => assert_eq!(cmd.poll_secs, 5),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_validate_file() {
        let cli = Cli::try_parse_from(["haven", "config", "validate", "/tmp/haven.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from(["haven", "-c", "/custom/config.toml", "-vv", "config", "path"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert_eq!(cli.verbose, 2);

        let cli = Cli::try_parse_from(["haven", "config", "show", "-q"]).unwrap();
        assert!(cli.quiet);
    }
}
