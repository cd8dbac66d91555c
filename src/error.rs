//! Error type for the mercount library.
//!
//! Library code returns `MerError`; the binaries wrap it in `anyhow::Result`
//! and add context as they go.
//!
//! # Error Categories
//!
//! - **Io**: file system operations (open, read, write, rename)
//! - **Configuration**: invalid or contradictory run options
//! - **Format**: malformed artifact (bad header tag, unparsable record)
//! - **TruncatedFile**: artifact shorter than its header declares
//! - **KeyLengthMismatch**: artifact built for a different k
//! - **InvalidMer**: a k-mer string of the wrong length or with a non-ACGT base
//! - **Merge**: any failure while merging dump files
//! - **Subprocess**: a generator command exited unsuccessfully
//!
//! Count saturation and a full table are not errors: the first is logged at
//! dump time and the second is the `AddOutcome::Full` status of the table.

use std::fmt;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, MerError>;

#[derive(Debug)]
pub enum MerError {
    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: std::io::Error,
    },

    /// Invalid or contradictory options, e.g. changing k after first use.
    Configuration(String),

    /// Malformed artifact.
    Format { path: PathBuf, detail: String },

    /// Fewer bytes available than the header declares.
    TruncatedFile {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Artifact key width disagrees with the configured k (both in bits).
    KeyLengthMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    /// Bases that do not form a k-mer of the configured length.
    InvalidMer { mer: String, detail: String },

    /// Merge failure with a human readable cause.
    Merge { message: String },

    /// A generator command failed.
    Subprocess { command: String, status: String },
}

impl MerError {
    pub fn io(path: impl AsRef<Path>, operation: &'static str, source: std::io::Error) -> Self {
        MerError::Io {
            path: path.as_ref().to_path_buf(),
            operation,
            source,
        }
    }

    pub fn format(path: impl AsRef<Path>, detail: impl Into<String>) -> Self {
        MerError::Format {
            path: path.as_ref().to_path_buf(),
            detail: detail.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        MerError::Configuration(message.into())
    }

    pub fn merge(message: impl Into<String>) -> Self {
        MerError::Merge {
            message: message.into(),
        }
    }

    /// Converts an error raised while merging into a `Merge` error, keeping
    /// the original description as the message.
    pub fn into_merge(self) -> Self {
        match self {
            MerError::Merge { .. } => self,
            other => MerError::Merge {
                message: other.to_string(),
            },
        }
    }

    /// Copy of this error for handing to several threads. I/O sources are
    /// rebuilt from their kind and message.
    pub fn replicate(&self) -> Self {
        match self {
            MerError::Io {
                path,
                operation,
                source,
            } => MerError::Io {
                path: path.clone(),
                operation: *operation,
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            MerError::Configuration(msg) => MerError::Configuration(msg.clone()),
            MerError::Format { path, detail } => MerError::Format {
                path: path.clone(),
                detail: detail.clone(),
            },
            MerError::TruncatedFile {
                path,
                expected,
                actual,
            } => MerError::TruncatedFile {
                path: path.clone(),
                expected: *expected,
                actual: *actual,
            },
            MerError::KeyLengthMismatch {
                path,
                expected,
                found,
            } => MerError::KeyLengthMismatch {
                path: path.clone(),
                expected: *expected,
                found: *found,
            },
            MerError::InvalidMer { mer, detail } => MerError::InvalidMer {
                mer: mer.clone(),
                detail: detail.clone(),
            },
            MerError::Merge { message } => MerError::Merge {
                message: message.clone(),
            },
            MerError::Subprocess { command, status } => MerError::Subprocess {
                command: command.clone(),
                status: status.clone(),
            },
        }
    }
}

impl fmt::Display for MerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MerError::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {} on '{}': {}",
                operation,
                path.display(),
                source
            ),
            MerError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            MerError::Format { path, detail } => {
                write!(f, "Invalid format in '{}': {}", path.display(), detail)
            }
            MerError::TruncatedFile {
                path,
                expected,
                actual,
            } => write!(
                f,
                "File '{}' is truncated: expected {} bytes, found {}",
                path.display(),
                expected,
                actual
            ),
            MerError::KeyLengthMismatch {
                path,
                expected,
                found,
            } => write!(
                f,
                "Invalid mer length in '{}': expected key length {} bits, found {}",
                path.display(),
                expected,
                found
            ),
            MerError::InvalidMer { mer, detail } => write!(f, "Invalid k-mer '{}': {}", mer, detail),
            MerError::Merge { message } => write!(f, "Merge failed: {}", message),
            MerError::Subprocess { command, status } => {
                write!(f, "Generator command '{}' failed: {}", command, status)
            }
        }
    }
}

impl std::error::Error for MerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MerError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
