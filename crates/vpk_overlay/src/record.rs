//! Surgical record replacement in KeyValues-style definition files.
//!
//! Files such as `scripts/items/items_game.txt` are deeply nested blocks of the
//! form `"<id>" { ... }`. Swapping a couple of item definitions does not need a
//! full parser; a record is found in three steps:
//!
//! 1. Find the first occurrence of a marker string (e.g. an item's display name).
//! 2. Look back at most [`LOOKBACK_WINDOW`] characters for `"<digits>" {` and take
//!    the occurrence closest to the marker, which is the innermost header.
//! 3. Walk forward from that brace counting `{`/`}` until depth returns to zero.
//!
//! The returned span always starts at the header's opening quote and ends at the
//! matching closing brace, so it is bracket-balanced. The locator does not
//! disambiguate: if a marker occurs in several records, the first one wins.

use crate::error::Result;
use crate::replacements::ReplacementMapping;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Characters scanned backwards from the marker for the record header.
pub const LOOKBACK_WINDOW: usize = 200;

/// Byte range of a located record, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSpan {
    pub start: usize,
    pub end: usize,
}

impl RecordSpan {
    pub fn as_str<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Why a record could not be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// The marker does not occur in the text.
    MarkerAbsent,
    /// No `"<id>" {` header precedes the marker within the lookback window.
    NoHeaderInWindow,
}

impl std::fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFoundReason::MarkerAbsent => f.write_str("marker not present"),
            NotFoundReason::NoHeaderInWindow => f.write_str("no record header before marker"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("Record for '{marker}' not found: {reason}")]
    RecordNotFound {
        marker: String,
        reason: NotFoundReason,
    },

    #[error("Record for '{marker}' is not closed before the end of the text")]
    UnbalancedRecord { marker: String },
}

/// Locate the innermost record containing the first occurrence of `marker`.
pub fn locate_record(text: &str, marker: &str) -> std::result::Result<RecordSpan, LocateError> {
    locate_record_with_window(text, marker, LOOKBACK_WINDOW)
}

/// [`locate_record`] with an explicit lookback window (in characters).
pub fn locate_record_with_window(
    text: &str,
    marker: &str,
    window: usize,
) -> std::result::Result<RecordSpan, LocateError> {
    let not_found = |reason: NotFoundReason| LocateError::RecordNotFound {
        marker: marker.to_string(),
        reason,
    };

    let marker_pos = text
        .find(marker)
        .ok_or_else(|| not_found(NotFoundReason::MarkerAbsent))?;

    let window_start = lookback_start(text, marker_pos, window);
    let (header, brace) = last_header(&text[window_start..marker_pos])
        .ok_or_else(|| not_found(NotFoundReason::NoHeaderInWindow))?;

    let close = matching_brace(text.as_bytes(), window_start + brace).ok_or_else(|| {
        LocateError::UnbalancedRecord {
            marker: marker.to_string(),
        }
    })?;

    Ok(RecordSpan {
        start: window_start + header,
        end: close + 1,
    })
}

/// Byte offset `window` characters before `pos` (clamped to the start).
fn lookback_start(text: &str, pos: usize, window: usize) -> usize {
    let Some(skip) = window.checked_sub(1) else {
        return pos;
    };
    text[..pos]
        .char_indices()
        .rev()
        .nth(skip)
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

/// Last `"<digits>"<ws>*{` in `window` as (quote offset, brace offset).
fn last_header(window: &str) -> Option<(usize, usize)> {
    let bytes = window.as_bytes();
    let mut last = None;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'"' {
            if let Some(brace) = header_brace(bytes, i) {
                last = Some((i, brace));
                i = brace + 1;
                continue;
            }
        }
        i += 1;
    }

    last
}

/// If a header starts at `quote`, the offset of its opening brace.
fn header_brace(bytes: &[u8], quote: usize) -> Option<usize> {
    let mut j = quote + 1;
    let digits_start = j;
    while j < bytes.len() && bytes[j].is_ascii_digit() {
        j += 1;
    }
    if j == digits_start || bytes.get(j) != Some(&b'"') {
        return None;
    }
    j += 1;
    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    (bytes.get(j) == Some(&b'{')).then_some(j)
}

/// Offset of the `}` closing the `{` at `open`, or `None` if the text ends first.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, byte) in bytes[open..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// One record swap: find the record holding `marker`, replace it with the
/// mapping's text for `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    pub marker: String,
    pub key: String,
    /// Human-readable description for progress output.
    #[serde(default)]
    pub label: Option<String>,
}

impl RecordPatch {
    pub fn new(marker: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            key: key.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The label, falling back to the marker.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.marker)
    }
}

/// Result of a single [`RecordPatch`] attempt. Only `Applied` changes the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    RecordNotFound(NotFoundReason),
    UnbalancedRecord,
    /// The record exists but the mapping has no entry for the key.
    ReplacementMissing,
    /// The record exists but the mapping's entry for the key is empty.
    ReplacementEmpty,
}

#[derive(Debug, Clone)]
pub struct PatchAttempt {
    pub patch: RecordPatch,
    pub outcome: PatchOutcome,
}

/// Outcomes of a patch pass, in the order the patches were attempted.
#[derive(Debug, Clone, Default)]
pub struct PatchReport {
    pub attempts: Vec<PatchAttempt>,
}

impl PatchReport {
    /// Number of records replaced.
    pub fn applied(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome == PatchOutcome::Applied)
            .count()
    }
}

/// Apply `patches` in order to `text`.
///
/// Each lookup runs against the text as modified by the previous patches. The
/// located record's text is replaced at its first occurrence in `text`, which
/// can precede the located span when identical records repeat.
pub fn patch_records(
    text: &mut String,
    patches: &[RecordPatch],
    mapping: &ReplacementMapping,
) -> PatchReport {
    let mut report = PatchReport::default();

    for patch in patches {
        let outcome = match locate_record(text, &patch.marker) {
            Err(LocateError::RecordNotFound { reason, .. }) => PatchOutcome::RecordNotFound(reason),
            Err(LocateError::UnbalancedRecord { .. }) => PatchOutcome::UnbalancedRecord,
            Ok(span) => match mapping.get(&patch.key) {
                None => PatchOutcome::ReplacementMissing,
                Some("") => PatchOutcome::ReplacementEmpty,
                Some(replacement) => {
                    let record = span.as_str(text).to_string();
                    let start = text.find(&record).unwrap_or(span.start);
                    text.replace_range(start..start + record.len(), replacement);
                    PatchOutcome::Applied
                }
            },
        };

        match outcome {
            PatchOutcome::Applied => tracing::info!("Patched record: {}", patch.display_name()),
            other => tracing::warn!(
                "Record '{}' (key '{}') not patched: {:?}",
                patch.marker,
                patch.key,
                other
            ),
        }

        report.attempts.push(PatchAttempt {
            patch: patch.clone(),
            outcome,
        });
    }

    report
}

/// Patch a text file in place.
///
/// Invalid UTF-8 is replaced while reading. The file is rewritten only when at
/// least one record was applied.
pub fn patch_file(
    path: &Utf8Path,
    patches: &[RecordPatch],
    mapping: &ReplacementMapping,
) -> Result<PatchReport> {
    let bytes = std::fs::read(path.as_std_path())?;
    let mut text = String::from_utf8_lossy(&bytes).into_owned();

    let report = patch_records(&mut text, patches, mapping);
    if report.applied() > 0 {
        std::fs::write(path.as_std_path(), text)?;
    }
    Ok(report)
}
