//! Replacement records for the definition-file patcher.
//!
//! The mapping is a flat JSON object kept next to an overlay tree, keyed by a
//! logical record name:
//!
//! ```json
//! {
//!   "d2mods_upper": "\"9203\"\t{\t\"name\"\t\"Flightless Fury\" ... }",
//!   "d2mods_legs": "\"9204\"\t{ ... }"
//! }
//! ```

use crate::error::Result;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Logical record name -> raw replacement record text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplacementMapping {
    records: HashMap<String, String>,
}

impl ReplacementMapping {
    /// Load a mapping from a JSON file.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_std_path())?;
        // Tools on Windows like to prefix a BOM
        let contents = contents.trim_start_matches('\u{feff}');
        Ok(serde_json::from_str(contents)?)
    }

    /// Replacement text for `key`, if present (possibly empty).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.records.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ReplacementMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            records: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
