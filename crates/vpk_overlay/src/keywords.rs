//! Keyword-based entry exclusion.
//!
//! Matching is a plain case-insensitive substring search over the whole entry
//! path. There is no anchoring and no awareness of path segments, so a keyword
//! like `"queen"` also excludes anything else whose path contains it. Keyword
//! sets must be chosen narrow enough to avoid collateral removals.

/// A named set of lowercase substrings, usually one per hero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordSet {
    /// Display name used in reports (e.g. `"Windranger"`).
    pub name: String,
    keywords: Vec<String>,
}

impl KeywordSet {
    /// Create a set. Keywords are lowercased but otherwise kept verbatim,
    /// whitespace included. Empty keywords are dropped since they would match
    /// every path.
    pub fn new<I, S>(name: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// `true` if any keyword occurs in `lowered_path`, which must already be lowercase.
    fn matches_lowered(&self, lowered_path: &str) -> bool {
        self.keywords.iter().any(|k| lowered_path.contains(k.as_str()))
    }

    /// `true` if any keyword occurs anywhere in `path` (case-insensitive).
    pub fn matches(&self, path: &str) -> bool {
        self.matches_lowered(&path.to_lowercase())
    }
}

/// Index of the first set (in configured order) matching `path`.
///
/// The path is lowercased once for all sets.
pub fn first_match(path: &str, sets: &[KeywordSet]) -> Option<usize> {
    let lowered = path.to_lowercase();
    sets.iter().position(|set| set.matches_lowered(&lowered))
}

/// `true` if `path` matches any of `sets` and must be left out of the base copy.
pub fn is_excluded(path: &str, sets: &[KeywordSet]) -> bool {
    first_match(path, sets).is_some()
}
