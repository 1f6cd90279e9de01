//! Error types for merge operations.
//!
//! Only fatal conditions are errors. Degraded-but-recoverable situations (a
//! missing overlay directory, a record that could not be located) are reported
//! through [`MergeWarning`](crate::MergeWarning) and
//! [`PatchOutcome`](crate::PatchOutcome) instead and never stop a run.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Which pre-flight requirement was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The live archive that should be used as the merge base.
    SourceArchive,
    /// The external archive compiler executable.
    Compiler,
}

impl std::fmt::Display for Precondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precondition::SourceArchive => f.write_str("source archive"),
            Precondition::Compiler => f.write_str("archive compiler"),
        }
    }
}

/// Errors that abort a merge before the live archive is touched.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem I/O failed (working tree, backup, swap).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the replacement mapping side file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required input is absent; detected before anything is modified.
    #[error("Missing {what}: {path}")]
    PreconditionMissing {
        what: Precondition,
        path: Utf8PathBuf,
    },

    /// The configuration would make the run destroy its own inputs.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The base archive could not be read.
    #[error("Archive error: {0}")]
    Archive(#[from] vpk_archive::ArchiveError),

    /// The archive compiler failed; the live archive was left untouched.
    #[error("Compile failed: {0}")]
    CompileFailure(#[from] vpk_archive::CompileError),

    /// An archive entry would be written outside the working tree.
    #[error("Refusing to extract unsafe entry path: {0}")]
    UnsafeEntryPath(String),

    /// Another merge currently holds the lock for this rebuild directory.
    #[error("Another merge is already running (lock held on {0})")]
    Busy(Utf8PathBuf),

    /// Directory traversal of an overlay tree failed.
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// A path on disk is not valid UTF-8.
    #[error("Non UTF-8 path: {0}")]
    NonUtf8Path(std::path::PathBuf),
}
