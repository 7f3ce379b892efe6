//! cli
//!
//! Command-line interface layer for gitscm.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Initialise logging
//! - Turn SIGINT / SIGTERM into cancellation of the running operation
//! - Load the project file, reading the commit identity from the
//!   environment when the file has none
//! - Delegate to command handlers
//!
//! # Architecture
//!
//! The CLI layer is thin. It parses arguments via clap and dispatches to the
//! [`crate::engine`]. This is the only place that reads `GIT_AUTHOR_*` and
//! `GIT_COMMITTER_*`; everything below receives identities explicitly.

pub mod args;
pub mod commands;

pub use args::{Cli, LogFormat};

use std::env;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::cancel::{CancelToken, OpContext};
use crate::core::config::{Config, ProjectSettings};
use crate::core::types::{Identity, Signatures};
use crate::git::set_transport_timeout;

/// Environment variable holding a tracing filter directive.
pub const LOG_ENV: &str = "GITSCM_LOG";

/// Shared state for command handlers.
#[derive(Debug)]
pub struct Context {
    pub config: PathBuf,
    pub cancel: CancelToken,
}

impl Context {
    /// Load the project settings named by `--config`.
    ///
    /// Also applies the project's timeout to git transports.
    pub fn settings(&self) -> Result<ProjectSettings> {
        let settings = Config::load(&self.config, signatures_from_env())
            .with_context(|| format!("loading {}", self.config.display()))?;
        set_transport_timeout(settings.timeout);
        Ok(settings)
    }

    /// An operation context bounded by the project's timeout.
    pub fn op_context(&self, settings: &ProjectSettings) -> OpContext {
        settings.context(self.cancel.clone())
    }
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.debug, cli.log_format);

    let cancel = CancelToken::new();
    if let Err(e) = install_signal_handlers(&cancel) {
        warn!(error = %e, "signal handlers not installed");
    }

    let ctx = Context {
        config: cli.config.clone(),
        cancel,
    };
    commands::dispatch(cli.command, &ctx)
}

/// Cancel `token` on SIGINT or SIGTERM.
///
/// The first signal cancels cooperatively; a second one while the token is
/// already cancelled exits immediately with status 130.
pub fn install_signal_handlers(token: &CancelToken) -> std::io::Result<()> {
    let flag = token.flag();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(signal, 130, flag.clone())?;
        signal_hook::flag::register(signal, flag.clone())?;
    }
    Ok(())
}

/// Install the global subscriber, writing to stderr.
///
/// `GITSCM_LOG` overrides the level chosen by `--debug`.
pub fn init_logging(debug: bool, format: LogFormat) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()
            .ok(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .ok(),
    };
}

/// Commit identity from `GIT_AUTHOR_*` / `GIT_COMMITTER_*`.
///
/// The committer defaults to the author. None unless both author variables
/// are set to valid values.
pub fn signatures_from_env() -> Option<Signatures> {
    signatures_from(|key| env::var(key).ok())
}

fn signatures_from(var: impl Fn(&str) -> Option<String>) -> Option<Signatures> {
    let author = Identity::new(var("GIT_AUTHOR_NAME")?, var("GIT_AUTHOR_EMAIL")?).ok()?;
    let committer = match (var("GIT_COMMITTER_NAME"), var("GIT_COMMITTER_EMAIL")) {
        (None, None) => author.clone(),
        (name, email) => Identity::new(
            name.unwrap_or_else(|| author.name.clone()),
            email.unwrap_or_else(|| author.email.clone()),
        )
        .ok()?,
    };
    Some(Signatures { author, committer })
}
