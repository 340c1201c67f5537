//! Command-line interface for formsync.
//!
//! This module provides the CLI structure for the `formsync` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, DaemonCommand, FieldChanges, FormFields, ListCommand, QueueCommand,
    StatusCommand, SubmitCommand, SyncCommand, UpdateCommand,
};

/// formsync - Offline-first disclaimer form client
///
/// Submits disclaimer forms to the collection service, keeping them in a
/// local queue while the service cannot be reached and delivering them once
/// it can.
#[derive(Debug, Parser)]
#[command(name = "formsync")]
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

    /// Treat the network as unavailable instead of probing it
    #[arg(long, global = true)]
    pub offline: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit a disclaimer form
    Submit(SubmitCommand),

    /// List submissions (remote, or the local queue when offline)
    List(ListCommand),

    /// Inspect and edit the local queue
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Deliver queued submissions now
    Sync(SyncCommand),

    /// Update a delivered submission
    Update(UpdateCommand),

    /// Run the background sync scheduler
    Daemon(DaemonCommand),

    /// Show connectivity and queue status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_flags() {
        use crate::logging::Verbosity;

        assert_eq!(parse(&["formsync", "-q", "status"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["formsync", "status"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["formsync", "-v", "status"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["formsync", "-vv", "status"]).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_submit() {
        let cli = parse(&[
            "formsync", "submit", "--name", "A", "--email", "a@x.com", "--product", "cot",
            "--date", "2024-01-01",
        ]);
        let Command::Submit(cmd) = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(cmd.fields.name, "A");
        assert_eq!(cmd.fields.mobile, "");
        assert_eq!(
            cmd.fields.date,
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
        );
    }

    #[test]
    fn test_parse_submit_requires_fields() {
        assert!(Cli::try_parse_from(["formsync", "submit", "--name", "A"]).is_err());
    }

    #[test]
    fn test_parse_submit_rejects_bad_date() {
        assert!(Cli::try_parse_from([
            "formsync", "submit", "-n", "A", "-e", "a@x.com", "-p", "cot", "-d", "yesterday",
        ])
        .is_err());
    }

    #[test]
    fn test_parse_queue_edit() {
        let cli = parse(&["formsync", "queue", "edit", "7", "--email", "b@x.com"]);
        let Command::Queue(QueueCommand::Edit { key, changes }) = cli.command else {
            panic!("expected queue edit");
        };
        assert_eq!(key, 7);
        assert_eq!(changes.email.as_deref(), Some("b@x.com"));
        assert!(changes.name.is_none());
    }

    #[test]
    fn test_parse_queue_dead_letters() {
        let cli = parse(&["formsync", "queue", "dead-letters", "--json"]);
        assert!(matches!(
            cli.command,
            Command::Queue(QueueCommand::DeadLetters { json: true })
        ));
    }

    #[test]
    fn test_parse_update() {
        let cli = parse(&[
            "formsync", "update", "3", "-n", "A", "-e", "a@x.com", "-p", "cot",
        ]);
        let Command::Update(cmd) = cli.command else {
            panic!("expected update");
        };
        assert_eq!(cmd.id, 3);
    }

    #[test]
    fn test_parse_daemon_once() {
        let cli = parse(&["formsync", "daemon", "--once"]);
        assert!(matches!(cli.command, Command::Daemon(DaemonCommand { once: true })));
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = parse(&["formsync", "-c", "/custom/config.toml", "--offline", "list"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert!(cli.offline);
        assert!(matches!(cli.command, Command::List(_)));
    }

    #[test]
    fn test_parse_config_validate() {
        let cli = parse(&["formsync", "config", "validate", "-f", "x.toml"]);
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }
}
