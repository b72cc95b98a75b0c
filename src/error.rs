//! Fatal-error sentinel and recoverable-error bookkeeping.
//!
//! The pipeline distinguishes two error flows: ordinary `anyhow::Result` values for
//! per-line conditions that are counted and skipped (format mismatch, filter rejection,
//! a single resolver miss), and `Fatal`, a dedicated sentinel that unwinds straight to
//! `main` and terminates the run. Retrying, trimming, and token refresh all happen
//! below the Fatal boundary; only exhaustion of those strategies produces one.

use std::fmt;

/// Provenance attached to a fatal error when it originates from a specific input line.
#[derive(Debug, Clone)]
pub struct HitContext {
    pub filename: Option<String>,
    pub lineno: usize,
}

/// A fatal error: token acquisition failure, a 400 from the tracker, format-detection
/// failure, or a configuration error caught at startup validation. Carries an optional
/// restart hint (`--skip=<lineno>`) and Hit provenance when known.
#[derive(Debug, Clone)]
pub struct Fatal {
    pub message: String,
    pub context: Option<HitContext>,
    pub restart_hint: Option<usize>,
}

impl Fatal {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            restart_hint: None,
        }
    }

    pub fn with_context(mut self, filename: Option<String>, lineno: usize) -> Self {
        self.context = Some(HitContext { filename, lineno });
        self
    }

    pub fn with_restart_hint(mut self, lineno: usize) -> Self {
        self.restart_hint = Some(lineno);
        self
    }

    /// Render the single diagnostic line written to stderr before exit(1).
    pub fn diagnostic(&self) -> String {
        let mut msg = self.message.clone();
        if let Some(ctx) = &self.context {
            let file = ctx.filename.as_deref().unwrap_or("<stdin>");
            msg = format!("{msg} ({file}:{})", ctx.lineno);
        }
        if let Some(lineno) = self.restart_hint {
            msg = format!("{msg} -- restart with --skip={lineno}");
        }
        format!("fatal: {msg}")
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.diagnostic())
    }
}

impl std::error::Error for Fatal {}

impl From<anyhow::Error> for Fatal {
    fn from(e: anyhow::Error) -> Self {
        Fatal::new(e.to_string())
    }
}

pub type FatalResult<T> = std::result::Result<T, Fatal>;

/// The reasons a single line or Hit can fail to become a recorded request. Every
/// variant is counted in `Statistics`; none of them are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Line did not match the selected format, or its date failed to parse.
    Invalid,
    /// Rejected by a filter-chain predicate.
    Filtered,
    /// Resolver could not map the Hit to a site id.
    NoSite,
}

/// Formats a message the same way whether it reaches the terminal via `ErrorReporter`
/// or a raw `eprintln!` from signal handling; kept as a single function so the process
/// has one diagnostic voice.
pub fn format_fatal_message(message: &str) -> String {
    format!("error: {message}")
}
