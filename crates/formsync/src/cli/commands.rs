//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Subcommand};

use crate::record::Submission;

/// The disclaimer form fields.
#[derive(Debug, Clone, Args)]
pub struct FormFields {
    /// Donor name
    #[arg(short, long)]
    pub name: String,

    /// Contact email
    #[arg(short, long)]
    pub email: String,

    /// Mobile or other contact number
    #[arg(short, long, default_value = "")]
    pub mobile: String,

    /// Product being collected
    #[arg(short, long)]
    pub product: String,

    /// Submission date (YYYY-MM-DD), defaults to today
    #[arg(short, long)]
    pub date: Option<NaiveDate>,
}

impl FormFields {
    /// Build the submission these fields describe.
    #[must_use]
    pub fn into_submission(self) -> Submission {
        let submission = Submission::new(self.name, self.email, self.mobile, self.product);
        match self.date {
            Some(date) => submission.with_date(date),
            None => submission,
        }
    }
}

/// Fields to change on a pending record; unset fields keep their value.
#[derive(Debug, Clone, Default, Args)]
pub struct FieldChanges {
    /// New donor name
    #[arg(short, long)]
    pub name: Option<String>,

    /// New contact email
    #[arg(short, long)]
    pub email: Option<String>,

    /// New contact number
    #[arg(short, long)]
    pub mobile: Option<String>,

    /// New product
    #[arg(short, long)]
    pub product: Option<String>,

    /// New submission date (YYYY-MM-DD)
    #[arg(short, long)]
    pub date: Option<NaiveDate>,
}

impl FieldChanges {
    /// Whether no field is being changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.mobile.is_none()
            && self.product.is_none()
            && self.date.is_none()
    }

    /// Apply the changes on top of `submission`.
    #[must_use]
    pub fn apply(self, mut submission: Submission) -> Submission {
        if let Some(name) = self.name {
            submission.name = name;
        }
        if let Some(email) = self.email {
            submission.email = email;
        }
        if let Some(mobile) = self.mobile {
            submission.mobile = mobile;
        }
        if let Some(product) = self.product {
            submission.product = product;
        }
        if let Some(date) = self.date {
            submission.date = date;
        }
        submission
    }
}

/// Submit command arguments.
#[derive(Debug, Args)]
pub struct SubmitCommand {
    /// The form to submit
    #[command(flatten)]
    pub fields: FormFields,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Update command arguments.
#[derive(Debug, Args)]
pub struct UpdateCommand {
    /// Remote identifier of the submission
    pub id: i64,

    /// The replacement fields
    #[command(flatten)]
    pub fields: FormFields,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Sync command arguments.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Daemon command arguments.
#[derive(Debug, Args)]
pub struct DaemonCommand {
    /// Dispatch pending registrations once and exit
    #[arg(long)]
    pub once: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Local queue commands.
#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// List pending submissions
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Edit a pending submission
    Edit {
        /// Local key of the record
        key: i64,

        /// Fields to change
        #[command(flatten)]
        changes: FieldChanges,
    },

    /// Drop a pending submission without sending it
    Remove {
        /// Local key of the record
        key: i64,
    },

    /// List submissions given up on after repeated rejections
    DeadLetters {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move a dead letter back into the queue
    Requeue {
        /// Local key of the dead letter
        key: i64,
    },

    /// Delete a dead letter
    Discard {
        /// Local key of the dead letter
        key: i64,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
