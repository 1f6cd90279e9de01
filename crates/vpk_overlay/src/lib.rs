//! Per-hero cosmetic overlay merge engine for Dota 2 VPK mods.
//!
//! Given a live mod archive that already bundles many heroes' cosmetics, this
//! crate rebuilds it with a chosen set of heroes taken from another mod:
//!
//! - **Keyword exclusion**: drop every archive entry whose path mentions one of
//!   the overridden heroes
//! - **Overlays**: copy replacement trees (and single files) over the result
//! - **Record patching**: swap brace-delimited records in a definition file
//!   such as `scripts/items/items_game.txt`
//! - **Safe swap**: back up the pristine archive once, compile the tree with
//!   `vpk.exe`, and only then replace the live archive
//!
//! # Example
//!
//! ```no_run
//! use vpk_overlay::{KeywordSet, MergeConfig, Merger, OverlaySource};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MergeConfig {
//!     source_archive: "game/_ArdysaMods/pak01_dir.vpk".into(),
//!     backup_archive: "game/_ArdysaMods/pak01_dir_backup.vpk".into(),
//!     rebuild_dir: "_rebuild_temp".into(),
//!     compiler_executable: "tools/vpk.exe".into(),
//!     keyword_sets: vec![KeywordSet::new("Windranger", ["windrunner", "windranger"])],
//!     overlays: vec![OverlaySource {
//!         name: "Windranger".to_string(),
//!         root: "backups/windranger_d2mods".into(),
//!     }],
//!     injections: Vec::new(),
//!     patch: None,
//! };
//!
//! let report = Merger::new(config)
//!     .with_progress(|progress| {
//!         println!("Stage: {:?} {}/{}", progress.stage, progress.current, progress.total);
//!     })
//!     .run()?;
//! println!("Kept {} of {} entries", report.kept, report.entries_total);
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod error;
pub mod keywords;
pub mod materialize;
pub mod merge;
pub mod record;
pub mod replacements;

// Re-export main types
pub use backup::{BackupOutcome, RestoreOutcome};
pub use error::{Error, Precondition, Result};
pub use keywords::{first_match, is_excluded, KeywordSet};
pub use merge::{
    undo, AppliedOverlay, FileInjection, MergeConfig, MergeProgress, MergeReport, MergeStage,
    MergeWarning, Merger, OverlaySource, PatchPlan, RemovedEntries,
};
pub use record::{
    locate_record, LocateError, NotFoundReason, PatchAttempt, PatchOutcome, PatchReport,
    RecordPatch, RecordSpan,
};
pub use replacements::ReplacementMapping;
