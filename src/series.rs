//! Series position ("part") resolution
//!
//! Tagging tools disagree on where the position of a book in its series
//! lives. Sources are consulted in a fixed order and the first hit wins:
//!
//! 1. freeform fields "Series Part", "Series Position", "Part", "Volume"
//! 2. the grouping tag
//! 3. the title
//! 4. the album
//! 5. the name of the directory holding the file
//!
//! The track number is never consulted.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

/// Freeform field names holding the position, in priority order
pub const SERIES_PART_FIELDS: [&str; 4] = ["Series Part", "Series Position", "Part", "Volume"];

/// Free-text patterns, tried in order. Group 1 is the number.
const PATTERN_SOURCES: [&str; 8] = [
    r"(?i)\bbook\s*(\d+(?:\.\d+)?)",
    r"(?i)\bpart\s*(\d+(?:\.\d+)?)",
    r"(?i)\bvol(?:ume)?\.?\s*(\d+(?:\.\d+)?)",
    r"#\s*(\d+(?:\.\d+)?)",
    r"^\s*(\d+(?:\.\d+)?)\s*[-:–—]",
    r"(?i)-\s*book\s*(\d+(?:\.\d+)?)",
    r"\(\s*(\d+(?:\.\d+)?)\s*\)",
    r"\b(\d+(?:\.\d+)?)\b",
];

lazy_static! {
    /// `PATTERN_SOURCES` compiled, same order
    static ref PATTERNS: Vec<Regex> = PATTERN_SOURCES
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                log::error!("series pattern {:?} does not compile: {}", p, e);
                None
            }
        })
        .collect();
}

/// Position of the book in its series, if any source names one
pub fn resolve_series_part(
    custom: &BTreeMap<String, String>,
    grouping: &str,
    title: &str,
    album: &str,
    path: &Path,
) -> Option<String> {
    for alias in SERIES_PART_FIELDS {
        let value = custom
            .iter()
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(alias))
            .map(|(_, value)| value.trim());
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            log::debug!("series part {:?} from field {:?}", value, alias);
            return Some(normalize_series_part(value));
        }
    }

    let directory = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let sources = [
        ("grouping", grouping),
        ("title", title),
        ("album", album),
        ("directory", directory.as_str()),
    ];
    for (source, text) in sources {
        if let Some(part) = extract_series_part(text) {
            log::debug!("series part {:?} from {}", part, source);
            return Some(part);
        }
    }

    None
}

/// First series number found in free text, normalized
pub fn extract_series_part(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    PATTERNS
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| normalize_series_part(m.as_str()))
}

/// Strip leading zeros, keeping any fraction: "001" → "1", "01.5" → "1.5".
///
/// Values that are not plain numbers are returned trimmed but otherwise
/// untouched.
pub fn normalize_series_part(value: &str) -> String {
    let value = value.trim();
    let (int_part, frac_part) = match value.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (value, None),
    };

    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !is_digits(int_part) || !frac_part.map_or(true, is_digits) {
        return value.to_string();
    }

    let trimmed = int_part.trim_start_matches('0');
    let int_part = if trimmed.is_empty() { "0" } else { trimmed };
    match frac_part {
        Some(frac) => format!("{}.{}", int_part, frac),
        None => int_part.to_string(),
    }
}
