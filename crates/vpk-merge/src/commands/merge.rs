use crate::errors::CliError;
use crate::println_pad;
use crate::utils::{self, config::AppConfig};
use camino::Utf8PathBuf;
use colored::Colorize;
use miette::Result;
use vpk_overlay::{
    BackupOutcome, MergeProgress, MergeReport, MergeStage, Merger, PatchOutcome, PatchReport,
};

#[derive(Debug)]
pub struct RunMergeArgs {
    pub config: AppConfig,
    pub config_dir: Utf8PathBuf,
}

pub fn run_merge(args: RunMergeArgs) -> Result<()> {
    let compiler = args.config.find_compiler(&args.config_dir)?;
    let merge_config = args.config.to_merge_config(&args.config_dir, compiler)?;
    let live = merge_config.source_archive.clone();

    println!(
        "{} {}",
        "Merging profile:".bright_blue().bold(),
        args.config.name.bright_cyan().bold()
    );
    println_pad!("{} {}", "Archive:".bright_white(), live);
    println_pad!(
        "{} {}",
        "Compiler:".bright_white(),
        merge_config.compiler_executable
    );

    let report = Merger::new(merge_config)
        .with_progress(print_progress)
        .run()
        .map_err(|e| CliError::from_merge(e, &args.config.base))?;

    print_report(&report, &args.config);
    Ok(())
}

fn print_progress(progress: MergeProgress) {
    match progress.stage {
        MergeStage::BackingUp => println!("\n{}", "Backing up archive...".bright_blue()),
        MergeStage::Extracting if progress.current == 0 => println!(
            "\n{} {}",
            "Extracting".bright_blue(),
            format!("{} entries...", progress.total).bright_blue()
        ),
        MergeStage::Extracting => {
            println_pad!("{} files extracted...", progress.current.to_string().bright_white())
        }
        MergeStage::Overlaying => println!("\n{}", "Applying overlays...".bright_blue()),
        MergeStage::Patching => {}
        MergeStage::Compiling => println!(
            "\n{}",
            "Rebuilding archive with vpk.exe (this may take a moment)...".bright_blue()
        ),
        MergeStage::Swapping => println!("\n{}", "Replacing live archive...".bright_blue()),
        MergeStage::Done | MergeStage::Failed => {}
    }
}

fn print_report(report: &MergeReport, config: &AppConfig) {
    match report.backup {
        BackupOutcome::Created => println!("\n{}", "Backup created.".bright_green()),
        BackupOutcome::AlreadyPresent => println!("\n{}", "Backup already exists.".dimmed()),
    }

    if let Some(patch) = &report.patch {
        print_patch(patch);
    }

    if !report.warnings.is_empty() {
        println!();
        for warning in &report.warnings {
            println!(
                "{} {}",
                "WARNING:".bright_yellow().bold(),
                warning.to_string().bright_yellow()
            );
        }
    }

    let mut lines = vec![
        format!(
            "{} {} of {} entries",
            "Kept:".bright_white().bold(),
            report.kept,
            report.entries_total
        ),
    ];
    for removed in &report.removed {
        lines.push(format!(
            "{} {} {} files ({} skin)",
            "Removed:".bright_white().bold(),
            removed.count,
            removed.set_name,
            config.base
        ));
    }
    for overlay in &report.overlays {
        lines.push(format!(
            "{} {} {} files",
            "Added:".bright_white().bold(),
            overlay.files,
            overlay.name.bright_cyan()
        ));
    }
    for injection in &report.injections {
        lines.push(format!(
            "{} {}",
            "Injected:".bright_white().bold(),
            injection.bright_cyan()
        ));
    }
    if let Some(patch) = &report.patch {
        lines.push(format!(
            "{} {} of {}",
            "Records patched:".bright_white().bold(),
            patch.applied(),
            patch.attempts.len()
        ));
    }
    lines.push(format!(
        "{} {}",
        "Archive size:".bright_white().bold(),
        utils::format_mib(report.archive_size)
    ));
    lines.push(format!(
        "{} {:.1}s",
        "Elapsed:".bright_white().bold(),
        report.elapsed.as_secs_f64()
    ));

    println!();
    utils::print_ansi_boxed_lines(&lines);
    println!();
    println!(
        "{}",
        "Done! Restart Dota 2 for changes to take effect."
            .bright_green()
            .bold()
    );
    println_pad!("All other heroes: {} skins", config.base.bright_cyan());
}

fn print_patch(patch: &PatchReport) {
    println!();
    for attempt in &patch.attempts {
        let name = attempt.patch.display_name();
        match attempt.outcome {
            PatchOutcome::Applied => println_pad!("{} {}", "Patched:".bright_green(), name),
            PatchOutcome::RecordNotFound(reason) => {
                println_pad!("{} {} ({})", "Not found:".bright_yellow(), name, reason)
            }
            PatchOutcome::UnbalancedRecord => {
                println_pad!("{} {} (unbalanced braces)", "Skipped:".bright_yellow(), name)
            }
            PatchOutcome::ReplacementMissing => println_pad!(
                "{} {} (no '{}' in replacements)",
                "Skipped:".bright_yellow(),
                name,
                attempt.patch.key
            ),
            PatchOutcome::ReplacementEmpty => println_pad!(
                "{} {} (empty '{}' replacement)",
                "Skipped:".bright_yellow(),
                name,
                attempt.patch.key
            ),
        }
    }
}
