//! Error type shared by the walker, encoder and decoder.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a whole encode or decode call.
///
/// Per-entry problems (unreadable directories, undecodable files, single
/// failed writes) never surface here; they are collected into the reports
/// returned alongside a successful result.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// An I/O error on a path the operation cannot continue without.
    #[error("I/O error for path {1}: {0}")]
    Io(#[source] std::io::Error, PathBuf),

    /// The encode root is missing or is not a directory.
    #[error("Path is not a valid directory: {0}")]
    NotADirectory(PathBuf),

    /// A required section header was not found in the document.
    #[error("Section '{0}' not found in document")]
    MissingSection(&'static str),

    /// A fenced block was opened but never closed.
    #[error("Unterminated fence in section '{section}' opened at line {line}")]
    UnterminatedFence { section: &'static str, line: usize },

    /// The Structure block cannot be turned into a directory tree.
    #[error("Malformed structure at line {line}: {reason}")]
    MalformedStructure { line: usize, reason: String },

    /// The caller raised the cancellation flag.
    #[error("Operation was cancelled")]
    Cancelled,
}
