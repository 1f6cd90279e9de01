use camino::Utf8PathBuf;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;
use vpk_overlay::Precondition;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Could not determine the profile location")]
    #[diagnostic(
        code(config::path_unknown),
        help("Set VPK_MERGE_CONFIG to the path of a vpk-merge.toml profile")
    )]
    ConfigPathUnknown,

    #[error("Profile file error")]
    #[diagnostic(
        code(config::parse_error),
        help("Check your vpk-merge.toml file for syntax errors")
    )]
    ConfigParseError {
        #[source_code]
        src: NamedSource<String>,
        #[source]
        source: toml::de::Error,
        #[label("error occurred here")]
        span: Option<SourceSpan>,
    },

    #[error("Failed to write default profile to {path}")]
    #[diagnostic(
        code(config::write_failed),
        help("Check file permissions next to the executable, or set VPK_MERGE_CONFIG")
    )]
    ConfigWriteFailed {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid profile: {reason}")]
    #[diagnostic(code(config::invalid))]
    InvalidProfile { reason: String },

    #[error("Archive compiler (vpk.exe) not found")]
    #[diagnostic(
        code(compiler::not_found),
        help("Place vpk.exe in tools/ next to the profile. Checked:\n{checked}")
    )]
    CompilerNotFound { checked: String },

    #[error("Source archive not found: {path}")]
    #[diagnostic(
        code(archive::not_found),
        help("Make sure the {base} mods are applied first")
    )]
    SourceArchiveMissing { path: Utf8PathBuf, base: String },

    #[error("Archive compilation failed")]
    #[diagnostic(
        code(compiler::failed),
        help("The live archive was not modified. The working tree was kept for inspection.")
    )]
    CompileFailed {
        #[source]
        source: vpk_archive::CompileError,
    },

    #[error("Another merge is already running")]
    #[diagnostic(
        code(merge::busy),
        help("Wait for it to finish. If none is running, delete {lock}")
    )]
    Busy { lock: Utf8PathBuf },

    #[error("Merge failed")]
    #[diagnostic(code(merge::failed))]
    MergeFailed {
        #[source]
        source: vpk_overlay::Error,
    },

    #[error("IO operation failed")]
    #[diagnostic(code(io::operation_failed))]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn config_parse_error(path: &str, content: String, source: toml::de::Error) -> Self {
        let span = source.span().map(SourceSpan::from);
        Self::ConfigParseError {
            src: NamedSource::new(path, content),
            source,
            span,
        }
    }

    pub fn compiler_not_found(checked: &[Utf8PathBuf]) -> Self {
        let checked = checked
            .iter()
            .map(|p| format!("  {}", p))
            .collect::<Vec<_>>()
            .join("\n");
        Self::CompilerNotFound { checked }
    }

    /// Map a library error onto the diagnostic shown to the user.
    pub fn from_merge(error: vpk_overlay::Error, base: &str) -> Self {
        match error {
            vpk_overlay::Error::PreconditionMissing {
                what: Precondition::SourceArchive,
                path,
            } => Self::SourceArchiveMissing {
                path,
                base: base.to_string(),
            },
            vpk_overlay::Error::PreconditionMissing {
                what: Precondition::Compiler,
                path,
            } => Self::compiler_not_found(&[path]),
            vpk_overlay::Error::CompileFailure(source) => Self::CompileFailed { source },
            vpk_overlay::Error::Busy(lock) => Self::Busy { lock },
            vpk_overlay::Error::InvalidConfig(reason) => Self::InvalidProfile { reason },
            source => Self::MergeFailed { source },
        }
    }
}
