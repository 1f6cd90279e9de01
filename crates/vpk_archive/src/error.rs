//! Error types for reading and compiling VPK archives.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Convenience alias used by the reader.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors that can occur while opening or reading a VPK archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The archive path does not exist.
    #[error("Archive not found: {0}")]
    NotFound(Utf8PathBuf),

    /// The archive exists but its directory tree cannot be parsed.
    #[error("Corrupt archive {path}: {reason}")]
    Corrupt { path: Utf8PathBuf, reason: String },

    /// The requested entry is not listed in the directory tree.
    #[error("Entry not found in archive: {0}")]
    MissingEntry(String),

    /// Filesystem I/O failed while reading entry data.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exit information captured from a failed compiler run.
#[derive(Debug, Clone)]
pub struct ExitInfo {
    /// Process exit code, `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard error, trimmed.
    pub stderr: String,
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code)?,
            None => write!(f, "terminated without exit code")?,
        }
        if !self.stderr.is_empty() {
            write!(f, ": {}", self.stderr)?;
        }
        Ok(())
    }
}

/// Errors reported by an [`ArchiveCompiler`](crate::ArchiveCompiler).
#[derive(Error, Debug)]
pub enum CompileError {
    /// The compiler executable could not be started.
    #[error("Failed to start compiler {executable}: {source}")]
    Spawn {
        executable: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The compiler ran but reported failure.
    #[error("Compiler failed with {0}")]
    Exit(ExitInfo),

    /// The compiler reported success but did not produce its output archive.
    #[error("Compiler did not create {0}")]
    MissingOutput(Utf8PathBuf),

    /// The tree to compile has no parent directory or no file name.
    #[error("Cannot compile {0}: tree root needs a parent directory and a name")]
    InvalidTree(Utf8PathBuf),
}
