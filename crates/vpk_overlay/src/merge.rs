//! The merge orchestrator.
//!
//! [`Merger`] rebuilds a live VPK with some heroes' assets swapped for another
//! mod's:
//!
//! 1. Pre-flight: the source archive and compiler executable must exist.
//! 2. `BackingUp`: copy the live archive aside, once. An existing backup is kept.
//! 3. `Extracting`: wipe the rebuild directory, then write every archive entry
//!    that matches none of the keyword sets into the working tree.
//! 4. `Overlaying`: copy each overlay tree in configured order (later wins), then
//!    the single-file injections. Missing sources are warnings.
//! 5. `Patching`: optionally swap records in one definition file. Missing target
//!    or mapping file are warnings.
//! 6. `Compiling`: run the archive compiler on the working tree. Any failure
//!    aborts the run here.
//! 7. `Swapping`: copy the compiled archive over the live one.
//! 8. `Done`: delete the rebuild directory.
//!
//! Steps 1-6 only touch the rebuild directory and the backup, so every fatal
//! error leaves the live archive as it was. A failed run keeps the working tree
//! on disk for inspection.

use crate::backup::{ensure_backup, restore_backup, BackupOutcome, RestoreOutcome};
use crate::error::{Error, Precondition, Result};
use crate::keywords::{first_match, KeywordSet};
use crate::materialize::{apply_overlay, inject_file, sanitize_entry_path, write_entry};
use crate::record::{patch_file, PatchReport, RecordPatch};
use crate::replacements::ReplacementMapping;
use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use std::fs::File;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vpk_archive::{ArchiveCompiler, ArchiveReader, CompileError, VpkArchive, VpkCompiler};

/// Extraction progress is reported every this many kept entries.
pub const EXTRACT_PROGRESS_INTERVAL: usize = 500;

/// A directory tree copied into the working tree.
#[derive(Debug, Clone)]
pub struct OverlaySource {
    /// Display name (e.g. `"Green Artemis Windranger"`).
    pub name: String,
    pub root: Utf8PathBuf,
}

/// A single file copied to a fixed destination in the working tree.
#[derive(Debug, Clone)]
pub struct FileInjection {
    pub name: String,
    pub source: Utf8PathBuf,
    /// Destination relative to the working tree root, forward-slash separated.
    pub destination: String,
}

/// Record swaps applied to one text file of the working tree.
#[derive(Debug, Clone)]
pub struct PatchPlan {
    /// Path of the file to patch, relative to the working tree root.
    pub target: String,
    /// JSON replacement mapping side file.
    pub replacements: Utf8PathBuf,
    /// Patches, applied in order.
    pub records: Vec<RecordPatch>,
}

/// Everything a merge run needs.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// The live archive (e.g. `game/_ArdysaMods/pak01_dir.vpk`).
    pub source_archive: Utf8PathBuf,
    /// Where the pristine archive is kept for undo.
    pub backup_archive: Utf8PathBuf,
    /// Disposable staging directory; wiped at the start of every run.
    pub rebuild_dir: Utf8PathBuf,
    pub compiler_executable: Utf8PathBuf,
    /// Entries matching any of these sets are left out of the base copy.
    pub keyword_sets: Vec<KeywordSet>,
    /// Applied in order; later overlays win on path collisions.
    pub overlays: Vec<OverlaySource>,
    /// Applied after all overlays, in order.
    pub injections: Vec<FileInjection>,
    pub patch: Option<PatchPlan>,
}

impl MergeConfig {
    /// The working tree: `rebuild_dir/<archive stem>` (e.g. `.../pak01_dir`).
    ///
    /// The compiler names its output after this directory, so the compiled
    /// archive carries the live archive's file name.
    pub fn working_tree(&self) -> Utf8PathBuf {
        let stem = self.source_archive.file_stem().unwrap_or("archive");
        self.rebuild_dir.join(stem)
    }

    fn lock_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.lock", self.rebuild_dir))
    }
}

/// Stages of a merge run, emitted in order. `Failed` may follow any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStage {
    BackingUp,
    Extracting,
    Overlaying,
    Patching,
    Compiling,
    Swapping,
    Done,
    Failed,
}

/// Progress information passed to the callback registered with
/// [`Merger::with_progress`].
#[derive(Debug, Clone)]
pub struct MergeProgress {
    pub stage: MergeStage,
    /// Entries kept so far (only meaningful while `Extracting`).
    pub current: usize,
    /// Entries in the archive (only meaningful while `Extracting`).
    pub total: usize,
}

/// A condition that reduced the effect of a run without stopping it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeWarning {
    OverlayMissing { name: String, path: Utf8PathBuf },
    InjectionMissing { name: String, path: Utf8PathBuf },
    PatchTargetMissing { path: Utf8PathBuf },
    ReplacementsMissing { path: Utf8PathBuf },
    ReplacementsUnreadable { path: Utf8PathBuf, reason: String },
    /// The live archive was swapped but the rebuild directory could not be removed.
    CleanupFailed { path: Utf8PathBuf, reason: String },
}

impl std::fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeWarning::OverlayMissing { name, path } => {
                write!(f, "{} overlay not found at {}", name, path)
            }
            MergeWarning::InjectionMissing { name, path } => {
                write!(f, "{} not found at {}", name, path)
            }
            MergeWarning::PatchTargetMissing { path } => {
                write!(f, "{} not found in extracted archive, skipping patch", path)
            }
            MergeWarning::ReplacementsMissing { path } => {
                write!(f, "replacement file {} not found, skipping patch", path)
            }
            MergeWarning::ReplacementsUnreadable { path, reason } => {
                write!(f, "replacement file {} unreadable ({}), skipping patch", path, reason)
            }
            MergeWarning::CleanupFailed { path, reason } => {
                write!(f, "could not remove {} ({})", path, reason)
            }
        }
    }
}

/// Files removed by one keyword set.
#[derive(Debug, Clone)]
pub struct RemovedEntries {
    pub set_name: String,
    pub count: usize,
}

/// Files written by one overlay.
#[derive(Debug, Clone)]
pub struct AppliedOverlay {
    pub name: String,
    pub files: usize,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub backup: BackupOutcome,
    /// Entries listed in the base archive.
    pub entries_total: usize,
    /// Entries copied into the working tree.
    pub kept: usize,
    /// One element per keyword set, in configured order.
    pub removed: Vec<RemovedEntries>,
    pub overlays: Vec<AppliedOverlay>,
    /// Names of the injections that were applied.
    pub injections: Vec<String>,
    /// `None` when no patch was configured or it was skipped with a warning.
    pub patch: Option<PatchReport>,
    pub warnings: Vec<MergeWarning>,
    /// Size of the archive now at the live path.
    pub archive_size: u64,
    pub elapsed: Duration,
}

type ProgressCallback = Arc<dyn Fn(MergeProgress) + Send + Sync>;
type ArchiveOpener = Box<dyn Fn(&Utf8Path) -> vpk_archive::Result<Box<dyn ArchiveReader>>>;

struct Extraction {
    entries_total: usize,
    kept: usize,
    removed: Vec<RemovedEntries>,
}

/// Runs the merge pipeline for one [`MergeConfig`].
///
/// By default archives are read with [`VpkArchive`] and compiled with
/// [`VpkCompiler`] using `compiler_executable`; both can be replaced.
pub struct Merger {
    config: MergeConfig,
    open_archive: ArchiveOpener,
    compiler: Box<dyn ArchiveCompiler>,
    progress_callback: Option<ProgressCallback>,
}

impl Merger {
    pub fn new(config: MergeConfig) -> Self {
        let compiler = VpkCompiler::new(config.compiler_executable.clone());
        Self {
            config,
            open_archive: Box::new(|path: &Utf8Path| {
                Ok(Box::new(VpkArchive::open(path)?) as Box<dyn ArchiveReader>)
            }),
            compiler: Box::new(compiler),
            progress_callback: None,
        }
    }

    /// Replace how the base archive is opened.
    pub fn with_archive_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn(&Utf8Path) -> vpk_archive::Result<Box<dyn ArchiveReader>> + 'static,
    {
        self.open_archive = Box::new(opener);
        self
    }

    /// Replace the archive compiler.
    pub fn with_compiler<C: ArchiveCompiler + 'static>(mut self, compiler: C) -> Self {
        self.compiler = Box::new(compiler);
        self
    }

    /// Register a progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(MergeProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Run the full pipeline. See the module docs for the stages.
    pub fn run(&self) -> Result<MergeReport> {
        let result = self.run_internal();
        if let Err(e) = &result {
            tracing::error!("Merge failed: {}", e);
            self.emit(MergeStage::Failed, 0, 0);
        }
        result
    }

    fn run_internal(&self) -> Result<MergeReport> {
        let start_time = Instant::now();
        let config = &self.config;

        tracing::info!("Merging into {}", config.source_archive);
        tracing::info!("Rebuild dir: {}", config.rebuild_dir);
        tracing::info!(
            "Keyword sets: {}, overlays: {}",
            config.keyword_sets.len(),
            config.overlays.len()
        );

        self.preflight()?;
        let lock_path = config.lock_path();
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }
        let _lock = RunLock::acquire(&lock_path)?;
        let mut warnings = Vec::new();

        self.emit(MergeStage::BackingUp, 0, 0);
        let backup = ensure_backup(&config.source_archive, &config.backup_archive)?;

        let working_tree = config.working_tree();
        let extraction = self.extract(&working_tree)?;

        self.emit(MergeStage::Overlaying, 0, 0);
        let overlays = self.apply_overlays(&working_tree, &mut warnings)?;
        let injections = self.apply_injections(&working_tree, &mut warnings)?;

        self.emit(MergeStage::Patching, 0, 0);
        let patch = self.apply_patch(&working_tree, &mut warnings)?;

        self.emit(MergeStage::Compiling, 0, 0);
        let compiled = self.compiler.compile(&working_tree)?;
        if !compiled.as_std_path().is_file() {
            return Err(CompileError::MissingOutput(compiled).into());
        }

        self.emit(MergeStage::Swapping, 0, 0);
        let archive_size = std::fs::copy(compiled.as_std_path(), config.source_archive.as_std_path())?;
        tracing::info!(
            "Swapped {} ({} bytes) into {}",
            compiled,
            archive_size,
            config.source_archive
        );

        self.emit(MergeStage::Done, 0, 0);
        if let Err(e) = std::fs::remove_dir_all(config.rebuild_dir.as_std_path()) {
            tracing::warn!("Failed to clean up {}: {}", config.rebuild_dir, e);
            warnings.push(MergeWarning::CleanupFailed {
                path: config.rebuild_dir.clone(),
                reason: e.to_string(),
            });
        }

        Ok(MergeReport {
            backup,
            entries_total: extraction.entries_total,
            kept: extraction.kept,
            removed: extraction.removed,
            overlays,
            injections,
            patch,
            warnings,
            archive_size,
            elapsed: start_time.elapsed(),
        })
    }

    fn preflight(&self) -> Result<()> {
        let config = &self.config;

        if !config.source_archive.as_std_path().is_file() {
            return Err(Error::PreconditionMissing {
                what: Precondition::SourceArchive,
                path: config.source_archive.clone(),
            });
        }
        if !config.compiler_executable.as_std_path().is_file() {
            return Err(Error::PreconditionMissing {
                what: Precondition::Compiler,
                path: config.compiler_executable.clone(),
            });
        }

        // The rebuild directory is wiped, it must not hold the archives.
        for protected in [&config.source_archive, &config.backup_archive] {
            if protected.starts_with(&config.rebuild_dir) {
                return Err(Error::InvalidConfig(format!(
                    "rebuild directory {} contains {}",
                    config.rebuild_dir, protected
                )));
            }
        }

        Ok(())
    }

    fn extract(&self, working_tree: &Utf8Path) -> Result<Extraction> {
        let config = &self.config;

        if config.rebuild_dir.as_std_path().exists() {
            std::fs::remove_dir_all(config.rebuild_dir.as_std_path())?;
        }
        std::fs::create_dir_all(working_tree.as_std_path())?;

        let mut archive = (self.open_archive)(&config.source_archive)?;
        let paths = archive.entry_paths().to_vec();
        let entries_total = paths.len();
        self.emit(MergeStage::Extracting, 0, entries_total);

        let mut removed = vec![0usize; config.keyword_sets.len()];
        let mut kept = 0;

        for path in &paths {
            if let Some(set) = first_match(path, &config.keyword_sets) {
                tracing::debug!("Excluded {} ({})", path, config.keyword_sets[set].name);
                removed[set] += 1;
                continue;
            }

            let bytes = archive.read_entry(path)?;
            write_entry(working_tree, path, &bytes)?;
            kept += 1;

            if kept % EXTRACT_PROGRESS_INTERVAL == 0 {
                self.emit(MergeStage::Extracting, kept, entries_total);
            }
        }

        tracing::info!("Extracted {} of {} entries", kept, entries_total);

        let removed = config
            .keyword_sets
            .iter()
            .zip(removed)
            .map(|(set, count)| {
                tracing::info!("Removed {} entries matching {}", count, set.name);
                RemovedEntries {
                    set_name: set.name.clone(),
                    count,
                }
            })
            .collect();

        Ok(Extraction {
            entries_total,
            kept,
            removed,
        })
    }

    fn apply_overlays(
        &self,
        working_tree: &Utf8Path,
        warnings: &mut Vec<MergeWarning>,
    ) -> Result<Vec<AppliedOverlay>> {
        let mut applied = Vec::new();

        for overlay in &self.config.overlays {
            if !overlay.root.as_std_path().is_dir() {
                tracing::warn!("Overlay '{}' not found at {}", overlay.name, overlay.root);
                warnings.push(MergeWarning::OverlayMissing {
                    name: overlay.name.clone(),
                    path: overlay.root.clone(),
                });
                continue;
            }

            let files = apply_overlay(&overlay.root, working_tree)?;
            tracing::info!("Overlay '{}': {} files", overlay.name, files);
            applied.push(AppliedOverlay {
                name: overlay.name.clone(),
                files,
            });
        }

        Ok(applied)
    }

    fn apply_injections(
        &self,
        working_tree: &Utf8Path,
        warnings: &mut Vec<MergeWarning>,
    ) -> Result<Vec<String>> {
        let mut applied = Vec::new();

        for injection in &self.config.injections {
            if !injection.source.as_std_path().is_file() {
                tracing::warn!("Injection '{}' not found at {}", injection.name, injection.source);
                warnings.push(MergeWarning::InjectionMissing {
                    name: injection.name.clone(),
                    path: injection.source.clone(),
                });
                continue;
            }

            inject_file(&injection.source, working_tree, &injection.destination)?;
            tracing::info!("Injected {} -> {}", injection.source, injection.destination);
            applied.push(injection.name.clone());
        }

        Ok(applied)
    }

    fn apply_patch(
        &self,
        working_tree: &Utf8Path,
        warnings: &mut Vec<MergeWarning>,
    ) -> Result<Option<PatchReport>> {
        let Some(plan) = &self.config.patch else {
            return Ok(None);
        };

        let target = working_tree.join(sanitize_entry_path(&plan.target)?);
        if !target.as_std_path().is_file() {
            tracing::warn!("Patch target {} not found", target);
            warnings.push(MergeWarning::PatchTargetMissing {
                path: Utf8PathBuf::from(&plan.target),
            });
            return Ok(None);
        }

        if !plan.replacements.as_std_path().is_file() {
            tracing::warn!("Replacement file {} not found", plan.replacements);
            warnings.push(MergeWarning::ReplacementsMissing {
                path: plan.replacements.clone(),
            });
            return Ok(None);
        }

        let mapping = match ReplacementMapping::load(&plan.replacements) {
            Ok(mapping) => mapping,
            Err(e) => {
                tracing::warn!("Replacement file {} unreadable: {}", plan.replacements, e);
                warnings.push(MergeWarning::ReplacementsUnreadable {
                    path: plan.replacements.clone(),
                    reason: e.to_string(),
                });
                return Ok(None);
            }
        };

        let report = patch_file(&target, &plan.records, &mapping)?;
        tracing::info!(
            "Patched {} of {} records in {}",
            report.applied(),
            plan.records.len(),
            plan.target
        );
        Ok(Some(report))
    }

    fn emit(&self, stage: MergeStage, current: usize, total: usize) {
        if let Some(callback) = &self.progress_callback {
            callback(MergeProgress {
                stage,
                current,
                total,
            });
        }
    }
}

/// Restore the live archive from its backup. Never touches the working tree.
pub fn undo(config: &MergeConfig) -> Result<RestoreOutcome> {
    let lock_path = config.lock_path();
    // A merge creates the lock's directory first, so without it none is running.
    let _lock = match lock_path.parent() {
        Some(parent) if !parent.as_std_path().is_dir() => None,
        _ => Some(RunLock::acquire(&lock_path)?),
    };
    restore_backup(&config.backup_archive, &config.source_archive)
}

/// Exclusive advisory lock on `<rebuild_dir>.lock`. The file is deleted and
/// the lock released on drop.
struct RunLock {
    file: File,
    path: Utf8PathBuf,
}

impl RunLock {
    fn acquire(path: &Utf8Path) -> Result<Self> {
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path.as_std_path())?;
        file.try_lock_exclusive()
            .map_err(|_| Error::Busy(path.to_owned()))?;
        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(self.path.as_std_path()) {
            tracing::debug!("Failed to remove {}: {}", self.path, e);
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!("Failed to release {}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;
    use std::sync::Mutex;
    use vpk_archive::{ArchiveError, ExitInfo};

    type Snapshot = BTreeMap<String, Vec<u8>>;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    struct MemoryArchive {
        paths: Vec<String>,
        data: BTreeMap<String, Vec<u8>>,
    }

    impl MemoryArchive {
        fn new(entries: &[(&str, &[u8])]) -> Self {
            Self {
                paths: entries.iter().map(|(p, _)| p.to_string()).collect(),
                data: entries
                    .iter()
                    .map(|(p, d)| (p.to_string(), d.to_vec()))
                    .collect(),
            }
        }
    }

    impl ArchiveReader for MemoryArchive {
        fn entry_paths(&self) -> &[String] {
            &self.paths
        }

        fn read_entry(&mut self, path: &str) -> vpk_archive::Result<Vec<u8>> {
            self.data
                .get(path)
                .cloned()
                .ok_or_else(|| ArchiveError::MissingEntry(path.to_string()))
        }
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        FailExit,
        NoOutput,
    }

    /// Records the working tree it was asked to compile.
    struct FakeCompiler {
        behavior: Behavior,
        seen: Rc<RefCell<Option<Snapshot>>>,
    }

    impl ArchiveCompiler for FakeCompiler {
        fn compile(&self, tree_root: &Utf8Path) -> std::result::Result<Utf8PathBuf, CompileError> {
            *self.seen.borrow_mut() = Some(snapshot(tree_root));
            let output = vpk_archive::compiled_archive_path(tree_root)?;
            match self.behavior {
                Behavior::Succeed => {
                    std::fs::write(&output, b"compiled").unwrap();
                    Ok(output)
                }
                Behavior::FailExit => Err(CompileError::Exit(ExitInfo {
                    code: Some(1),
                    stderr: "boom".to_string(),
                })),
                // claims success, writes nothing
                Behavior::NoOutput => Ok(output),
            }
        }
    }

    fn snapshot(root: &Utf8Path) -> Snapshot {
        walkdir::WalkDir::new(root)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e
                    .path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/");
                (rel, std::fs::read(e.path()).unwrap())
            })
            .collect()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
        config: MergeConfig,
    }

    impl Fixture {
        fn new() -> Self {
            init_tracing();
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

            let game = root.join("game/_ArdysaMods");
            std::fs::create_dir_all(&game).unwrap();
            std::fs::write(game.join("pak01_dir.vpk"), b"original archive").unwrap();
            std::fs::create_dir_all(root.join("tools")).unwrap();
            std::fs::write(root.join("tools/vpk.exe"), b"").unwrap();

            let config = MergeConfig {
                source_archive: game.join("pak01_dir.vpk"),
                backup_archive: game.join("pak01_dir_backup.vpk"),
                rebuild_dir: root.join("_rebuild_temp"),
                compiler_executable: root.join("tools/vpk.exe"),
                keyword_sets: vec![KeywordSet::new("Hero One", ["hero1"])],
                overlays: vec![OverlaySource {
                    name: "Hero One".to_string(),
                    root: root.join("backups/hero1"),
                }],
                injections: Vec::new(),
                patch: None,
            };

            Self {
                _dir: dir,
                root,
                config,
            }
        }

        fn write(&self, rel: &str, content: &[u8]) {
            let path = self.root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        fn live_bytes(&self) -> Vec<u8> {
            std::fs::read(&self.config.source_archive).unwrap()
        }

        fn merger(
            &self,
            entries: &'static [(&'static str, &'static [u8])],
            behavior: Behavior,
        ) -> (Merger, Rc<RefCell<Option<Snapshot>>>) {
            let seen = Rc::new(RefCell::new(None));
            let merger = Merger::new(self.config.clone())
                .with_archive_opener(move |_| {
                    Ok(Box::new(MemoryArchive::new(entries)) as Box<dyn ArchiveReader>)
                })
                .with_compiler(FakeCompiler {
                    behavior,
                    seen: seen.clone(),
                });
            (merger, seen)
        }
    }

    const BASE: &[(&str, &[u8])] = &[
        ("a/x.vmdl", b"x"),
        ("hero1/y.vmat", b"y"),
        ("hero2/z.vmat", b"z"),
    ];

    #[test]
    fn test_end_to_end_overlay() {
        let fixture = Fixture::new();
        fixture.write("backups/hero1/hero1/new.vmat", b"new");

        let (merger, seen) = fixture.merger(BASE, Behavior::Succeed);
        let report = merger.run().unwrap();

        let tree = seen.borrow().clone().unwrap();
        let files: Vec<&str> = tree.keys().map(String::as_str).collect();
        assert_eq!(files, ["a/x.vmdl", "hero1/new.vmat", "hero2/z.vmat"]);
        assert_eq!(tree["hero1/new.vmat"], b"new");
        assert_eq!(tree["hero2/z.vmat"], b"z");

        assert_eq!(report.entries_total, 3);
        assert_eq!(report.kept, 2);
        assert_eq!(report.removed[0].count, 1);
        assert_eq!(report.overlays[0].files, 1);
        assert_eq!(report.backup, BackupOutcome::Created);
        assert!(report.warnings.is_empty());
        assert_eq!(report.archive_size, 8);

        assert_eq!(fixture.live_bytes(), b"compiled");
        assert_eq!(
            std::fs::read(&fixture.config.backup_archive).unwrap(),
            b"original archive"
        );
        assert!(!fixture.config.rebuild_dir.exists());
        assert!(!fixture.config.lock_path().exists());
    }

    #[test]
    fn test_compile_failure_leaves_archive_untouched() {
        let fixture = Fixture::new();
        fixture.write("backups/hero1/hero1/new.vmat", b"new");

        let (merger, _) = fixture.merger(BASE, Behavior::FailExit);
        let result = merger.run();

        assert!(matches!(
            result,
            Err(Error::CompileFailure(CompileError::Exit(_)))
        ));
        assert_eq!(fixture.live_bytes(), b"original archive");
        // kept for inspection
        assert!(fixture.config.working_tree().join("a/x.vmdl").exists());
    }

    #[test]
    fn test_missing_output_is_compile_failure() {
        let fixture = Fixture::new();

        let (merger, _) = fixture.merger(BASE, Behavior::NoOutput);
        assert!(matches!(
            merger.run(),
            Err(Error::CompileFailure(CompileError::MissingOutput(_)))
        ));
        assert_eq!(fixture.live_bytes(), b"original archive");
    }

    #[test]
    fn test_missing_source_archive_aborts_before_backup() {
        let fixture = Fixture::new();
        std::fs::remove_file(&fixture.config.source_archive).unwrap();

        let (merger, seen) = fixture.merger(BASE, Behavior::Succeed);
        assert!(matches!(
            merger.run(),
            Err(Error::PreconditionMissing {
                what: Precondition::SourceArchive,
                ..
            })
        ));
        assert!(!fixture.config.backup_archive.exists());
        assert!(seen.borrow().is_none());
    }

    #[test]
    fn test_missing_compiler_aborts() {
        let fixture = Fixture::new();
        std::fs::remove_file(&fixture.config.compiler_executable).unwrap();

        let (merger, _) = fixture.merger(BASE, Behavior::Succeed);
        assert!(matches!(
            merger.run(),
            Err(Error::PreconditionMissing {
                what: Precondition::Compiler,
                ..
            })
        ));
        assert!(!fixture.config.backup_archive.exists());
    }

    #[test]
    fn test_missing_overlay_is_a_warning() {
        let fixture = Fixture::new();

        let (merger, seen) = fixture.merger(BASE, Behavior::Succeed);
        let report = merger.run().unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            &report.warnings[0],
            MergeWarning::OverlayMissing { name, .. } if name == "Hero One"
        ));
        assert!(report.overlays.is_empty());
        assert_eq!(seen.borrow().as_ref().unwrap().len(), 2);
        assert_eq!(fixture.live_bytes(), b"compiled");
    }

    #[test]
    fn test_existing_backup_is_kept() {
        let fixture = Fixture::new();
        std::fs::write(&fixture.config.backup_archive, b"pristine").unwrap();

        let (merger, _) = fixture.merger(BASE, Behavior::Succeed);
        let report = merger.run().unwrap();

        assert_eq!(report.backup, BackupOutcome::AlreadyPresent);
        assert_eq!(
            std::fs::read(&fixture.config.backup_archive).unwrap(),
            b"pristine"
        );
    }

    #[test]
    fn test_stale_rebuild_dir_is_wiped() {
        let fixture = Fixture::new();
        fixture.write("_rebuild_temp/pak01_dir/leftover.txt", b"old");

        let (merger, seen) = fixture.merger(BASE, Behavior::Succeed);
        merger.run().unwrap();

        assert!(!seen.borrow().as_ref().unwrap().contains_key("leftover.txt"));
    }

    const ITEMS_GAME: &[u8] = b"\"items_game\" { \"items\" {\n\
        \"101\" { \"name\" \"Hero Two's Upper Armor\" \"visuals\" { } }\n\
        \"102\" { \"name\" \"Hero Two's Legs\" }\n\
        } }";

    const WITH_ITEMS: &[(&str, &[u8])] = &[
        ("a/x.vmdl", b"x"),
        ("scripts/items/items_game.txt", ITEMS_GAME),
    ];

    fn items_patch(fixture: &Fixture) -> PatchPlan {
        PatchPlan {
            target: "scripts/items/items_game.txt".to_string(),
            replacements: fixture.root.join("backups/hero2/item_replacements.json"),
            records: vec![
                RecordPatch::new("Hero Two's Upper Armor", "upper").with_label("Upper Armor"),
                RecordPatch::new("Hero Two's Legs", "legs").with_label("Legs"),
            ],
        }
    }

    #[test]
    fn test_patch_through_merge() {
        let mut fixture = Fixture::new();
        fixture.config.patch = Some(items_patch(&fixture));
        fixture.write(
            "backups/hero2/item_replacements.json",
            br#"{"upper": "\"101\" { \"name\" \"Flightless Fury\" }"}"#,
        );

        let (merger, seen) = fixture.merger(WITH_ITEMS, Behavior::Succeed);
        let report = merger.run().unwrap();

        let patch = report.patch.unwrap();
        assert_eq!(patch.applied(), 1);
        assert_eq!(
            patch.attempts[1].outcome,
            crate::PatchOutcome::ReplacementMissing
        );

        let tree = seen.borrow().clone().unwrap();
        let items = String::from_utf8(tree["scripts/items/items_game.txt"].clone()).unwrap();
        assert!(items.contains("Flightless Fury"));
        assert!(items.contains("Hero Two's Legs"));
        assert!(!items.contains("Upper Armor"));
    }

    #[test]
    fn test_patch_inputs_missing_are_warnings() {
        let mut fixture = Fixture::new();
        fixture.config.patch = Some(items_patch(&fixture));

        // target present, mapping missing
        let (merger, _) = fixture.merger(WITH_ITEMS, Behavior::Succeed);
        let report = merger.run().unwrap();
        assert!(report.patch.is_none());
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, MergeWarning::ReplacementsMissing { .. })));

        // target missing
        let (merger, _) = fixture.merger(BASE, Behavior::Succeed);
        let report = merger.run().unwrap();
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, MergeWarning::PatchTargetMissing { .. })));
    }

    #[test]
    fn test_injection() {
        let mut fixture = Fixture::new();
        fixture.write("backups/hero2/models/weapon.vmdl_c", b"weapon");
        fixture.write("backups/hero2/item_replacements.json", b"{}");
        fixture.config.injections = vec![
            FileInjection {
                name: "Hero Two weapon".to_string(),
                source: fixture.root.join("backups/hero2/models/weapon.vmdl_c"),
                destination: "models/heroes/hero2/weapon.vmdl_c".to_string(),
            },
            FileInjection {
                name: "Absent".to_string(),
                source: fixture.root.join("backups/nothing.vmdl_c"),
                destination: "models/nothing.vmdl_c".to_string(),
            },
        ];

        let (merger, seen) = fixture.merger(BASE, Behavior::Succeed);
        let report = merger.run().unwrap();

        assert_eq!(report.injections, ["Hero Two weapon".to_string()]);
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, MergeWarning::InjectionMissing { name, .. } if name == "Absent")));
        let tree = seen.borrow().clone().unwrap();
        assert_eq!(tree["models/heroes/hero2/weapon.vmdl_c"], b"weapon");
        assert!(!tree.contains_key("item_replacements.json"));
    }

    #[test]
    fn test_progress_stages_in_order() {
        let fixture = Fixture::new();
        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = stages.clone();

        let (merger, _) = fixture.merger(BASE, Behavior::Succeed);
        merger
            .with_progress(move |p| {
                let mut stages = sink.lock().unwrap();
                if stages.last() != Some(&p.stage) {
                    stages.push(p.stage);
                }
            })
            .run()
            .unwrap();

        assert_eq!(
            *stages.lock().unwrap(),
            [
                MergeStage::BackingUp,
                MergeStage::Extracting,
                MergeStage::Overlaying,
                MergeStage::Patching,
                MergeStage::Compiling,
                MergeStage::Swapping,
                MergeStage::Done,
            ]
        );
    }

    #[test]
    fn test_failure_emits_failed_stage() {
        let fixture = Fixture::new();
        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = stages.clone();

        let (merger, _) = fixture.merger(BASE, Behavior::FailExit);
        let _ = merger
            .with_progress(move |p| sink.lock().unwrap().push(p.stage))
            .run();

        let stages = stages.lock().unwrap();
        assert_eq!(stages.last(), Some(&MergeStage::Failed));
        assert!(!stages.contains(&MergeStage::Swapping));
    }

    #[test]
    fn test_busy_when_locked() {
        let fixture = Fixture::new();
        let _held = RunLock::acquire(&fixture.config.lock_path()).unwrap();

        let (merger, _) = fixture.merger(BASE, Behavior::Succeed);
        assert!(matches!(merger.run(), Err(Error::Busy(_))));
        assert_eq!(fixture.live_bytes(), b"original archive");
    }

    #[test]
    fn test_rebuild_dir_must_not_contain_archives() {
        let mut fixture = Fixture::new();
        fixture.config.rebuild_dir = fixture.root.join("game");

        let (merger, _) = fixture.merger(BASE, Behavior::Succeed);
        assert!(matches!(merger.run(), Err(Error::InvalidConfig(_))));
        assert_eq!(fixture.live_bytes(), b"original archive");
    }

    #[test]
    fn test_undo_restores_backup() {
        let fixture = Fixture::new();

        let (merger, _) = fixture.merger(BASE, Behavior::Succeed);
        merger.run().unwrap();
        assert_eq!(fixture.live_bytes(), b"compiled");

        assert_eq!(
            undo(&fixture.config).unwrap(),
            RestoreOutcome::Restored { bytes: 16 }
        );
        assert_eq!(fixture.live_bytes(), b"original archive");
        assert!(!fixture.config.lock_path().exists());
    }

    #[test]
    fn test_undo_does_not_create_rebuild_parent() {
        let mut fixture = Fixture::new();
        fixture.config.rebuild_dir = fixture.root.join("missing").join("_rebuild_temp");

        assert_eq!(
            undo(&fixture.config).unwrap(),
            RestoreOutcome::NothingToRestore
        );
        assert!(!fixture.root.join("missing").exists());
    }

    #[test]
    fn test_undo_without_backup() {
        let fixture = Fixture::new();
        assert_eq!(
            undo(&fixture.config).unwrap(),
            RestoreOutcome::NothingToRestore
        );
        assert_eq!(fixture.live_bytes(), b"original archive");
    }
}
