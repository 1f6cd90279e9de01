//! Merge profile (`vpk-merge.toml`) loading and resolution.

use crate::errors::CliError;
use camino::{Utf8Path, Utf8PathBuf};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use vpk_overlay::{FileInjection, KeywordSet, MergeConfig, OverlaySource, PatchPlan, RecordPatch};

pub const CONFIG_FILE_NAME: &str = "vpk-merge.toml";

/// Overrides the profile location.
pub const CONFIG_ENV: &str = "VPK_MERGE_CONFIG";

/// Written when no profile exists yet.
const DEFAULT_PROFILE: &str = include_str!("../../../../profiles/ardysa.toml");

/// A merge profile as stored on disk. Paths are raw strings until resolved.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Shown in the run header.
    #[serde(default = "default_name")]
    pub name: String,
    /// Name of the mod the base archive comes from.
    #[serde(default = "default_base")]
    pub base: String,
    pub source_archive: String,
    pub backup_archive: String,
    #[serde(default = "default_rebuild_dir")]
    pub rebuild_dir: String,
    /// Candidate compiler executables, first existing wins.
    #[serde(default)]
    pub compiler: Vec<String>,
    #[serde(default)]
    pub overlays: Vec<OverlayConfig>,
    #[serde(default)]
    pub injections: Vec<InjectionConfig>,
    #[serde(default)]
    pub patch: Option<PatchConfig>,
}

/// A hero taken from the other mod: its keywords are excluded from the base
/// archive, and `root` (if any) is copied over the result.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OverlayConfig {
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub root: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct InjectionConfig {
    pub name: String,
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PatchConfig {
    pub target: String,
    pub replacements: String,
    pub records: Vec<RecordPatch>,
}

fn default_name() -> String {
    "vpk-merge".to_string()
}

fn default_base() -> String {
    "base".to_string()
}

fn default_rebuild_dir() -> String {
    "_rebuild_temp".to_string()
}

/// Returns the directory where the current executable resides.
pub fn install_dir() -> Option<Utf8PathBuf> {
    let exe = env::current_exe().ok()?;
    let parent = exe.parent()?;
    Utf8PathBuf::from_path_buf(parent.to_path_buf()).ok()
}

/// Returns a config file path located next to the executable.
pub fn config_path(file_name: &str) -> Option<Utf8PathBuf> {
    install_dir().map(|dir| dir.join(file_name))
}

/// `$VPK_MERGE_CONFIG` if set, otherwise `vpk-merge.toml` next to the executable.
pub fn default_config_path() -> Option<Utf8PathBuf> {
    match env::var(CONFIG_ENV) {
        Ok(path) if !path.is_empty() => Some(Utf8PathBuf::from(path)),
        _ => config_path(CONFIG_FILE_NAME),
    }
}

/// Loads the profile at its default location, writing the default profile
/// first if none exists.
pub fn load_or_create_config() -> Result<(AppConfig, Utf8PathBuf), CliError> {
    let path = default_config_path().ok_or(CliError::ConfigPathUnknown)?;
    let cfg = load_or_create_config_at(&path)?;
    Ok((cfg, path))
}

pub fn load_or_create_config_at(path: &Utf8Path) -> Result<AppConfig, CliError> {
    if !path.as_std_path().exists() {
        tracing::info!("No profile at {}, writing default", path);
        write_default_profile(path).map_err(|source| CliError::ConfigWriteFailed {
            path: path.to_owned(),
            source,
        })?;
    }
    load_config(path)
}

fn write_default_profile(path: &Utf8Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        fs::create_dir_all(parent.as_std_path())?;
    }
    fs::write(path.as_std_path(), DEFAULT_PROFILE)
}

pub fn load_config(path: &Utf8Path) -> Result<AppConfig, CliError> {
    let content = fs::read_to_string(path.as_std_path())?;
    parse_config(path.as_str(), content)
}

fn parse_config(name: &str, content: String) -> Result<AppConfig, CliError> {
    match toml::from_str(&content) {
        Ok(cfg) => Ok(cfg),
        Err(e) => Err(CliError::config_parse_error(name, content, e)),
    }
}

/// Expand `%VAR%`, `${VAR}` and `$VAR` from the environment.
/// Unset variables are left as written.
pub fn expand_env(raw: &str) -> String {
    let pattern = Regex::new(r"%(\w+)%|\$\{(\w+)\}|\$(\w+)").unwrap();
    pattern
        .replace_all(raw, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map_or("", |m| m.as_str());
            env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Expand `raw` and anchor it at `base_dir` if it is relative.
pub fn resolve_path(base_dir: &Utf8Path, raw: &str) -> Utf8PathBuf {
    let expanded = Utf8PathBuf::from(expand_env(raw));
    if expanded.is_relative() {
        base_dir.join(expanded)
    } else {
        expanded
    }
}

impl AppConfig {
    pub fn compiler_candidates(&self, base_dir: &Utf8Path) -> Vec<Utf8PathBuf> {
        self.compiler
            .iter()
            .map(|raw| resolve_path(base_dir, raw))
            .collect()
    }

    /// The first compiler candidate that exists.
    pub fn find_compiler(&self, base_dir: &Utf8Path) -> Result<Utf8PathBuf, CliError> {
        let candidates = self.compiler_candidates(base_dir);
        candidates
            .iter()
            .find(|path| path.as_std_path().is_file())
            .cloned()
            .ok_or_else(|| CliError::compiler_not_found(&candidates))
    }

    /// Resolve every path against `base_dir` and build the engine config.
    pub fn to_merge_config(
        &self,
        base_dir: &Utf8Path,
        compiler_executable: Utf8PathBuf,
    ) -> Result<MergeConfig, CliError> {
        for overlay in &self.overlays {
            if overlay.keywords.is_empty() {
                return Err(CliError::InvalidProfile {
                    reason: format!("overlay '{}' has no keywords", overlay.name),
                });
            }
            if overlay.keywords.iter().any(|k| k.trim().is_empty()) {
                return Err(CliError::InvalidProfile {
                    reason: format!("overlay '{}' has a blank keyword", overlay.name),
                });
            }
        }

        let keyword_sets = self
            .overlays
            .iter()
            .map(|o| KeywordSet::new(o.name.clone(), &o.keywords))
            .collect();

        let overlays = self
            .overlays
            .iter()
            .filter_map(|o| {
                o.root.as_deref().map(|root| OverlaySource {
                    name: o.name.clone(),
                    root: resolve_path(base_dir, root),
                })
            })
            .collect();

        let injections = self
            .injections
            .iter()
            .map(|i| FileInjection {
                name: i.name.clone(),
                source: resolve_path(base_dir, &i.source),
                destination: i.destination.clone(),
            })
            .collect();

        let patch = self.patch.as_ref().map(|p| PatchPlan {
            target: p.target.clone(),
            replacements: resolve_path(base_dir, &p.replacements),
            records: p.records.clone(),
        });

        Ok(MergeConfig {
            source_archive: resolve_path(base_dir, &self.source_archive),
            backup_archive: resolve_path(base_dir, &self.backup_archive),
            rebuild_dir: resolve_path(base_dir, &self.rebuild_dir),
            compiler_executable,
            keyword_sets,
            overlays,
            injections,
            patch,
        })
    }
}
