//! Error types for RGT operations
//!
//! Every failure the pipeline can hit is a variant of [`RgtError`]. Each
//! variant carries:
//! - A human-readable message
//! - A stable [`ErrorKind`] for programmatic handling
//! - The byte offset in the raw log where the problem was detected, when known
//!
//! # Recoverability
//!
//! Most errors abort the run. A few are downgraded to warnings by the
//! pipeline and processing continues:
//! - `bad-level`: the record is kept and its level is rendered as `UNKNOWN`
//! - `format-arity`: the rest of the format string is emitted verbatim
//! - `bad-control` without a node reference: the record is treated as a
//!   regular message
//!
//! # Example
//!
//! ```rust
//! use rgt_core::error::{ErrorKind, RgtError};
//!
//! let err = RgtError::TruncatedRecord {
//!     context: "record header".to_string(),
//!     offset: None,
//! }
//! .with_offset(42);
//!
//! assert_eq!(err.kind(), ErrorKind::TruncatedRecord);
//! assert_eq!(err.offset(), Some(42));
//! assert!(!err.is_recoverable());
//! assert_eq!(err.exit_code(), 1);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for RGT operations
pub type Result<T> = std::result::Result<T, RgtError>;

/// Stable error kind, used in diagnostics and JSON reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    TruncatedRecord,
    BadVersion,
    BadLength,
    BadLevel,
    BadControl,
    BadTreeOp,
    Io,
    FilterLoad,
    FormatArity,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TruncatedRecord => "truncated-record",
            ErrorKind::BadVersion => "bad-version",
            ErrorKind::BadLength => "bad-length",
            ErrorKind::BadLevel => "bad-level",
            ErrorKind::BadControl => "bad-control",
            ErrorKind::BadTreeOp => "bad-tree-op",
            ErrorKind::Io => "io",
            ErrorKind::FilterLoad => "filter-load",
            ErrorKind::FormatArity => "format-arity",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while translating a raw log
#[derive(Error, Debug)]
pub enum RgtError {
    // ═══════════════════════════════════════════════════════════════════════
    // Raw log decoding
    // ═══════════════════════════════════════════════════════════════════════

    /// Input ended in the middle of a record
    #[error("premature end of input inside {context}")]
    TruncatedRecord { context: String, offset: Option<u64> },

    /// The leading version byte names a format this reader does not know
    #[error("unsupported raw log format version {version}")]
    BadVersion { version: u8, offset: Option<u64> },

    /// A length prefix runs past the end of its enclosing field
    #[error("{field} length {declared} overruns the record ({available} bytes left)")]
    BadLength {
        field: &'static str,
        declared: usize,
        available: usize,
        offset: Option<u64>,
    },

    /// Level word is zero or carries bits outside the known set
    #[error("unknown log level 0x{level:04x}")]
    BadLevel { level: u16, offset: Option<u64> },

    // ═══════════════════════════════════════════════════════════════════════
    // Control messages and the flow tree
    // ═══════════════════════════════════════════════════════════════════════

    /// A Tester control message does not follow the grammar
    ///
    /// `node_id` is set once the message header named a node.
    #[error("malformed control message: {reason}")]
    BadControl {
        reason: String,
        node_id: Option<u32>,
        offset: Option<u64>,
    },

    /// A start or end event does not fit the current shape of the tree
    #[error("{reason}")]
    BadTreeOp {
        reason: String,
        node_id: u32,
        offset: Option<u64>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Environment
    // ═══════════════════════════════════════════════════════════════════════

    /// Reading input or writing output failed
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Filter document is missing or malformed
    #[error("cannot load filter '{path}': {reason}")]
    FilterLoad { path: String, reason: String },

    /// Format string needs more arguments than the record carries
    #[error("format string \"{format}\" needs more than {supplied} argument(s)")]
    FormatArity {
        format: String,
        supplied: usize,
        offset: Option<u64>,
    },
}

impl RgtError {
    /// Wraps an I/O failure on `path`
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        RgtError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the stable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RgtError::TruncatedRecord { .. } => ErrorKind::TruncatedRecord,
            RgtError::BadVersion { .. } => ErrorKind::BadVersion,
            RgtError::BadLength { .. } => ErrorKind::BadLength,
            RgtError::BadLevel { .. } => ErrorKind::BadLevel,
            RgtError::BadControl { .. } => ErrorKind::BadControl,
            RgtError::BadTreeOp { .. } => ErrorKind::BadTreeOp,
            RgtError::Io { .. } => ErrorKind::Io,
            RgtError::FilterLoad { .. } => ErrorKind::FilterLoad,
            RgtError::FormatArity { .. } => ErrorKind::FormatArity,
        }
    }

    /// Returns true if processing may continue after logging this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            RgtError::BadLevel { .. } | RgtError::FormatArity { .. } => true,
            RgtError::BadControl { node_id, .. } => node_id.is_none(),
            _ => false,
        }
    }

    /// Byte offset in the raw log where the error was detected
    pub fn offset(&self) -> Option<u64> {
        match self {
            RgtError::TruncatedRecord { offset, .. }
            | RgtError::BadVersion { offset, .. }
            | RgtError::BadLength { offset, .. }
            | RgtError::BadLevel { offset, .. }
            | RgtError::BadControl { offset, .. }
            | RgtError::BadTreeOp { offset, .. }
            | RgtError::FormatArity { offset, .. } => *offset,
            RgtError::Io { .. } | RgtError::FilterLoad { .. } => None,
        }
    }

    /// Attaches a raw log offset unless one is already recorded
    pub fn with_offset(mut self, at: u64) -> Self {
        match &mut self {
            RgtError::TruncatedRecord { offset, .. }
            | RgtError::BadVersion { offset, .. }
            | RgtError::BadLength { offset, .. }
            | RgtError::BadLevel { offset, .. }
            | RgtError::BadControl { offset, .. }
            | RgtError::BadTreeOp { offset, .. }
            | RgtError::FormatArity { offset, .. } => {
                if offset.is_none() {
                    *offset = Some(at);
                }
            }
            RgtError::Io { .. } | RgtError::FilterLoad { .. } => {}
        }
        self
    }

    /// Process exit code for a run aborted by this error
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// One-line diagnostic: `rgt: <kind>: <message> [at offset N]`
    pub fn report(&self) -> String {
        match self.offset() {
            Some(offset) => format!("rgt: {}: {} at offset {}", self.kind(), self, offset),
            None => format!("rgt: {}: {}", self.kind(), self),
        }
    }

    /// Converts this error to a JSON-serializable report
    pub fn to_error_report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            offset: self.offset(),
            recoverable: self.is_recoverable(),
        }
    }
}

/// JSON-serializable error report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    pub recoverable: bool,
}
