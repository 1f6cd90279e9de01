use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::AppConfig;
use camino::{Utf8Path, Utf8PathBuf};
use colored::Colorize;
use miette::Result;
use vpk_overlay::RestoreOutcome;

#[derive(Debug)]
pub struct RunUndoArgs {
    pub config: AppConfig,
    pub config_dir: Utf8PathBuf,
}

pub fn run_undo(args: RunUndoArgs) -> Result<()> {
    // undo never compiles, so no compiler lookup
    let merge_config = args
        .config
        .to_merge_config(&args.config_dir, Utf8PathBuf::new())?;
    let live = &merge_config.source_archive;

    println!(
        "{} {}",
        "Restoring original".bright_blue().bold(),
        format!("{} archive...", args.config.base).bright_cyan().bold()
    );

    match vpk_overlay::undo(&merge_config).map_err(|e| CliError::from_merge(e, &args.config.base))? {
        RestoreOutcome::Restored { bytes } => print_restored(live, bytes, &args.config.base),
        RestoreOutcome::NothingToRestore => {
            println!(
                "{} {}",
                "No backup found.".bright_yellow().bold(),
                "Nothing to restore.".bright_yellow()
            );
            println_pad!("{} {}", "Checked:".bright_white(), merge_config.backup_archive);
        }
    }

    Ok(())
}

fn print_restored(live: &Utf8Path, bytes: u64, base: &str) {
    println!(
        "{}",
        format!("Done! Original {} skins restored for all heroes.", base)
            .bright_green()
            .bold()
    );
    println_pad!(
        "{} {} ({})",
        "Path:".bright_white(),
        live.as_str().bright_white().bold(),
        crate::utils::format_mib(bytes)
    );
}
