use clap::builder::{styling::AnsiColor, Styles};
use clap::ColorChoice;
use clap::{CommandFactory, FromArgMatches, Parser};
use commands::{run_merge, run_undo, RunMergeArgs, RunUndoArgs};
use miette::Result;
use tracing_subscriber::EnvFilter;

mod commands;
mod errors;
mod utils;

/// Rebuild a Dota 2 mod archive with some heroes' cosmetics taken from another mod.
///
/// The merge profile is read from vpk-merge.toml next to the executable, or from
/// the path in VPK_MERGE_CONFIG.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Restore the archive from its backup instead of merging
    #[arg(long)]
    undo: bool,
}

fn parse_args() -> Args {
    // Configure colored/styled help output
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Blue.on_default());

    let matches = Args::command()
        .styles(styles)
        .color(ColorChoice::Auto)
        .get_matches();

    Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = parse_args();
    init_tracing();

    let (config, config_path) = utils::config::load_or_create_config()?;
    let config_dir = config_path
        .parent()
        .map(|p| p.to_owned())
        .unwrap_or_default();
    tracing::debug!("Using profile {}", config_path);

    if args.undo {
        run_undo(RunUndoArgs { config, config_dir })
    } else {
        run_merge(RunMergeArgs { config, config_dir })
    }
}
