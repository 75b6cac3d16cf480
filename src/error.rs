//! Centralized error types for mboxck.

use std::path::PathBuf;
use thiserror::Error;

/// BSD sysexits codes used by the CLI.
pub mod exit {
    pub const OK: i32 = 0;
    pub const USAGE: i32 = 64;
    pub const NOINPUT: i32 = 66;
    pub const UNAVAILABLE: i32 = 69;
    pub const SOFTWARE: i32 = 70;
    pub const CANTCREAT: i32 = 73;
    pub const IOERR: i32 = 74;
}

/// All errors produced by the mboxck library.
///
/// Most malformed input is downgraded to a warning and a best-effort
/// continuation (see [`crate::report::Reporter`]); only conditions the
/// library cannot recover from surface as errors here.
#[derive(Error, Debug)]
pub enum MboxckError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified mailbox does not exist.
    #[error("mailbox not found: {0}")]
    FileNotFound(PathBuf),

    /// Bytes do not match the expected grammar and the mailbox as a
    /// whole is unreadable.
    #[error("parse error at offset {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    /// An invariant of the parsed model does not hold.
    #[error("integrity violation in message {tag}: {reason}")]
    Integrity { tag: String, reason: String },

    /// Another process holds the mailbox lock and did not release it
    /// within the timeout.
    #[error("could not lock {path}: gave up after {seconds} s")]
    LockTimeout { path: PathBuf, seconds: u64 },

    /// Replacing the mailbox with the rewritten temp file failed.
    #[error("could not rename {from} to {to}: {source}")]
    Replace {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    /// The user cancelled the operation (SIGINT or an interactive 'q').
    #[error("operation cancelled by user")]
    Cancelled,
}

/// Convenience alias for `Result<T, MboxckError>`.
pub type Result<T> = std::result::Result<T, MboxckError>;

impl MboxckError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The sysexits code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io { .. } => exit::IOERR,
            Self::FileNotFound(_) => exit::NOINPUT,
            Self::Parse { .. } => exit::SOFTWARE,
            Self::Integrity { .. } => exit::SOFTWARE,
            Self::LockTimeout { .. } => exit::UNAVAILABLE,
            Self::Replace { .. } => exit::CANTCREAT,
            Self::Cancelled => exit::UNAVAILABLE,
        }
    }
}
