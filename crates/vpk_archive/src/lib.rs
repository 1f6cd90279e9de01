//! Valve VPK archive collaborators for the merge engine.
//!
//! - [`VpkArchive`] reads a `pak01_dir.vpk` directory file (and its numbered
//!   part archives) through the [`ArchiveReader`] trait.
//! - [`VpkCompiler`] packs a directory tree by running Valve's `vpk.exe`
//!   through the [`ArchiveCompiler`] trait.
//!
//! Writing the VPK format is intentionally left to the external tool.
//!
//! # Example
//!
//! ```no_run
//! use vpk_archive::{ArchiveReader, VpkArchive};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut archive = VpkArchive::open("game/_ArdysaMods/pak01_dir.vpk")?;
//! for path in archive.entry_paths().to_vec() {
//!     let bytes = archive.read_entry(&path)?;
//!     println!("{} ({} bytes)", path, bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod compiler;
pub mod error;
pub mod vpk;

pub use compiler::{compiled_archive_path, ArchiveCompiler, VpkCompiler};
pub use error::{ArchiveError, CompileError, ExitInfo, Result};
pub use vpk::{ArchiveReader, VpkArchive};
