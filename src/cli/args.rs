//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--config <path>` / `-c`: Project file (default `gitscm.toml`)
//! - `--debug`: Enable debug logging
//! - `--log-format <text|json>`: Log line format on stderr

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// gitscm - change detection and safe publishing for git-backed CI
#[derive(Parser, Debug)]
#[command(name = "gitscm")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Project configuration file
    #[arg(short, long, global = true, default_value = "gitscm.toml")]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// A ref and the revision it was observed at.
#[derive(clap::Args, Debug, Clone)]
pub struct RevisionArgs {
    /// Ref name: `refs/heads/<b>`, `refs/tags/<t>`, or a bare branch name
    #[arg(long = "ref", value_name = "REF")]
    pub reference: String,

    /// Exact commit id
    #[arg(long)]
    pub revision: String,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch and report whether a tracked ref changed
    #[command(
        long_about = "Fetch from the remote and compare every tracked ref against the \
            last revision built under its name.\n\n\
            Prints the poll result as JSON. A project whose workspace was never \
            created reports no changes; run `checkout` to create it.",
        after_help = "\
EXAMPLES:
    gitscm --config app.toml poll
    gitscm poll | jq -r .candidate_revision"
    )]
    Poll,

    /// Check out a build's revision and report culprits
    #[command(after_help = "\
EXAMPLES:
    # Build whatever changed
    gitscm checkout

    # Build exactly what a poll reported
    gitscm checkout --ref refs/heads/master --revision 3f2c...")]
    Checkout {
        /// Ref to build; resolved automatically when omitted
        #[arg(long = "ref", value_name = "REF", requires = "revision")]
        reference: Option<String>,

        /// Revision to build
        #[arg(long, requires = "reference")]
        revision: Option<String>,
    },

    /// Record a build's outcome
    Record {
        #[command(flatten)]
        target: RevisionArgs,

        /// Build number assigned by the scheduler
        #[arg(long)]
        build_number: u64,

        /// The build failed; nothing is recorded
        #[arg(long)]
        failed: bool,
    },

    /// Publish the workspace HEAD to the integration ref
    Publish {
        #[command(flatten)]
        target: RevisionArgs,

        /// Build number assigned by the scheduler
        #[arg(long)]
        build_number: u64,
    },

    /// Show recorded builds
    Status,
}
