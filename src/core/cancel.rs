//! core::cancel
//!
//! Cancellation and deadlines for blocking repository calls.
//!
//! Every poll, build and publish runs under an [`OpContext`]. The context is
//! checked before and after each client call and, for network transfers,
//! from inside the transfer callbacks so an in-flight fetch stops promptly.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use gitscm::core::cancel::{CancelToken, OpContext};
//!
//! let token = CancelToken::new();
//! let ctx = OpContext::new(token.clone()).with_timeout(Duration::from_secs(30));
//! assert!(ctx.check("fetch").is_ok());
//!
//! token.cancel();
//! assert!(ctx.check("fetch").is_err());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Why an operation stopped before finishing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Interrupted {
    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("{operation} timed out after {timeout:?}")]
    TimedOut {
        operation: String,
        timeout: Duration,
    },
}

/// Shared cancellation flag.
///
/// Clones observe the same flag; any holder may cancel.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The underlying flag, for signal handlers that set it directly.
    pub(crate) fn flag(&self) -> &Arc<AtomicBool> {
        &self.flag
    }
}

/// Cancellation token plus optional deadline for one operation.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancelToken,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new(token: CancelToken) -> Self {
        Self {
            token,
            timeout: None,
            deadline: None,
        }
    }

    /// A context that is never cancelled and never times out.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Set the deadline to `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// The same token with a fresh deadline of the same length.
    ///
    /// Each phase of a multi-step run (checkout, publish) gets its own budget.
    pub fn restarted(&self) -> Self {
        let ctx = Self::new(self.token.clone());
        match self.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// The configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// True if the operation should stop now.
    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled() || self.remaining() == Some(Duration::ZERO)
    }

    /// Fail with [`Interrupted`] if cancelled or past the deadline.
    pub fn check(&self, operation: &str) -> Result<(), Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled {
                operation: operation.to_string(),
            });
        }
        if let (Some(timeout), Some(Duration::ZERO)) = (self.timeout, self.remaining()) {
            return Err(Interrupted::TimedOut {
                operation: operation.to_string(),
                timeout,
            });
        }
        Ok(())
    }
}
