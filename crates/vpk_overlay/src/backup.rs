//! Backup of the live archive and the undo path.

use crate::error::Result;
use camino::Utf8Path;

/// What [`ensure_backup`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    /// The live archive was copied to the backup path.
    Created,
    /// A backup already existed and was left alone.
    AlreadyPresent,
}

/// What [`restore_backup`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The backup was copied over the live archive.
    Restored { bytes: u64 },
    /// No backup exists; nothing was changed.
    NothingToRestore,
}

/// Copy `live` to `backup` unless a backup already exists.
///
/// An existing backup is never overwritten: it holds the pristine archive from
/// before the first merge, while `live` may already be a merge result.
pub fn ensure_backup(live: &Utf8Path, backup: &Utf8Path) -> Result<BackupOutcome> {
    if backup.as_std_path().exists() {
        tracing::info!("Backup already exists at {}", backup);
        return Ok(BackupOutcome::AlreadyPresent);
    }

    if let Some(parent) = backup.parent() {
        std::fs::create_dir_all(parent.as_std_path())?;
    }
    std::fs::copy(live.as_std_path(), backup.as_std_path())?;
    tracing::info!("Backed up {} to {}", live, backup);
    Ok(BackupOutcome::Created)
}

/// Copy `backup` over `live` if a backup exists.
pub fn restore_backup(backup: &Utf8Path, live: &Utf8Path) -> Result<RestoreOutcome> {
    if !backup.as_std_path().exists() {
        tracing::info!("No backup at {}, nothing to restore", backup);
        return Ok(RestoreOutcome::NothingToRestore);
    }

    let bytes = std::fs::copy(backup.as_std_path(), live.as_std_path())?;
    tracing::info!("Restored {} from {}", live, backup);
    Ok(RestoreOutcome::Restored { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn paths(dir: &tempfile::TempDir) -> (Utf8PathBuf, Utf8PathBuf) {
        let root = Utf8Path::from_path(dir.path()).unwrap();
        (root.join("pak01_dir.vpk"), root.join("pak01_dir_backup.vpk"))
    }

    #[test]
    fn test_backup_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let (live, backup) = paths(&dir);
        std::fs::write(&live, b"original").unwrap();

        assert_eq!(ensure_backup(&live, &backup).unwrap(), BackupOutcome::Created);

        std::fs::write(&live, b"merged").unwrap();
        assert_eq!(
            ensure_backup(&live, &backup).unwrap(),
            BackupOutcome::AlreadyPresent
        );
        assert_eq!(std::fs::read(&backup).unwrap(), b"original");
    }

    #[test]
    fn test_restore() {
        let dir = tempfile::tempdir().unwrap();
        let (live, backup) = paths(&dir);
        std::fs::write(&backup, b"original").unwrap();
        std::fs::write(&live, b"merged").unwrap();

        assert_eq!(
            restore_backup(&backup, &live).unwrap(),
            RestoreOutcome::Restored { bytes: 8 }
        );
        assert_eq!(std::fs::read(&live).unwrap(), b"original");
    }

    #[test]
    fn test_restore_without_backup() {
        let dir = tempfile::tempdir().unwrap();
        let (live, backup) = paths(&dir);
        std::fs::write(&live, b"merged").unwrap();

        assert_eq!(
            restore_backup(&backup, &live).unwrap(),
            RestoreOutcome::NothingToRestore
        );
        assert_eq!(std::fs::read(&live).unwrap(), b"merged");
    }
}
