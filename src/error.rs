//! Typed error kinds for the CLI/MCP boundary.
//!
//! Everything below this boundary (Store, Ingest, Retrieval internals) uses
//! `anyhow::Result` and folds recoverable failures into returned counts, the
//! way the rest of this crate does. `QmdError` exists only where a caller
//! needs to dispatch on *kind* rather than just print a message: CLI exit
//! codes and MCP `isError` tool results.

use thiserror::Error;

/// One of the five error kinds a caller-facing operation can fail with.
#[derive(Debug, Error)]
pub enum QmdError {
    /// Malformed query, shell-expanded glob, unknown index/collection/document,
    /// unsupported subcommand. Caller mistake; exit code 2 for the CLI.
    #[error("{0}")]
    Usage(String),

    /// Integrity-check failure surfaced by `status`/cleanup, not by `search`.
    #[error("{0}")]
    State(String),

    /// Model load failure, remote API error, SQL engine error, I/O error.
    #[error(transparent)]
    External(#[from] anyhow::Error),

    /// Session aborted by cancellation, timeout, or shutdown. Callers should
    /// not retry automatically.
    #[error("session released")]
    CancelledExpired,

    /// Schema incompatible with a newer version, missing native extension,
    /// corrupt database file. The process exits non-zero.
    #[error("{0}")]
    Fatal(String),
}

impl QmdError {
    /// Exit code per §6: 0 success (not represented here), 1 recoverable, 2 usage.
    pub fn exit_code(&self) -> i32 {
        match self {
            QmdError::Usage(_) => 2,
            _ => 1,
        }
    }

    /// Whether this is the `SessionReleased` condition referenced throughout §4.5/§7.
    pub fn is_session_released(&self) -> bool {
        matches!(self, QmdError::CancelledExpired)
    }
}

pub type Result<T> = std::result::Result<T, QmdError>;
