//! Archive compilation through the external `vpk.exe` tool.

use crate::error::{CompileError, ExitInfo};
use camino::{Utf8Path, Utf8PathBuf};
use std::process::Command;

/// Compiles a directory tree back into a packed archive.
///
/// The merge orchestrator only talks to this trait, so its state machine can
/// be driven by a scripted implementation in tests.
pub trait ArchiveCompiler {
    /// Compile `tree_root` and return the path of the produced archive.
    ///
    /// Implementations must only return `Ok` when the output archive exists.
    fn compile(&self, tree_root: &Utf8Path) -> Result<Utf8PathBuf, CompileError>;
}

/// Runs Valve's `vpk.exe` (v1 output) against a working tree.
///
/// The tool is invoked as `vpk.exe <name>` from the tree's parent directory and
/// writes `<parent>/<name>.vpk`.
#[derive(Debug, Clone)]
pub struct VpkCompiler {
    executable: Utf8PathBuf,
}

impl VpkCompiler {
    pub fn new(executable: impl Into<Utf8PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Utf8Path {
        &self.executable
    }
}

/// Path of the archive a compiler produces for `tree_root`.
pub fn compiled_archive_path(tree_root: &Utf8Path) -> Result<Utf8PathBuf, CompileError> {
    let (Some(parent), Some(name)) = (tree_root.parent(), tree_root.file_name()) else {
        return Err(CompileError::InvalidTree(tree_root.to_owned()));
    };
    Ok(parent.join(format!("{}.vpk", name)))
}

impl ArchiveCompiler for VpkCompiler {
    fn compile(&self, tree_root: &Utf8Path) -> Result<Utf8PathBuf, CompileError> {
        let (Some(parent), Some(name)) = (tree_root.parent(), tree_root.file_name()) else {
            return Err(CompileError::InvalidTree(tree_root.to_owned()));
        };
        let output_path = compiled_archive_path(tree_root)?;

        tracing::info!(
            "Running {} {} (cwd={})",
            self.executable,
            name,
            parent
        );

        let output = Command::new(self.executable.as_std_path())
            .arg(name)
            .current_dir(parent.as_std_path())
            .output()
            .map_err(|source| CompileError::Spawn {
                executable: self.executable.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            tracing::debug!("[vpk] {}", line);
        }

        if !output.status.success() {
            return Err(CompileError::Exit(ExitInfo {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }));
        }

        if !output_path.as_std_path().is_file() {
            return Err(CompileError::MissingOutput(output_path));
        }

        Ok(output_path)
    }
}
