//! Tracked records and extraction from raw remote nodes.

use crate::remote::RawNode;
use serde::{Deserialize, Serialize};

/// A named entry whose grant expires at `expiration_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedRecord {
    /// Dotted name without the root label, e.g. `sub.example`
    pub name: String,
    /// Expiration in unix milliseconds
    pub expiration_ms: i64,
}

impl TrackedRecord {
    /// Create a record.
    pub fn new(name: impl Into<String>, expiration_ms: i64) -> Self {
        Self {
            name: name.into(),
            expiration_ms,
        }
    }
}

/// Parse a raw node into a record.
///
/// Returns `None` for anything unusable: no label list, only the root
/// label, an empty label, a missing or non-integer expiration, or an
/// expiration that is not strictly positive.
pub fn extract(node: &RawNode) -> Option<TrackedRecord> {
    let labels = node.name_labels.as_ref()?;
    let name = name_from_labels(labels)?;
    let expiration_ms = parse_expiration(node.expiration_raw.as_deref()?)?;
    Some(TrackedRecord {
        name,
        expiration_ms,
    })
}

/// Join every label except the root, reversed, with dots.
pub fn name_from_labels(labels: &[String]) -> Option<String> {
    let (_, rest) = labels.split_first()?;
    if rest.is_empty() || rest.iter().any(|l| l.is_empty()) {
        return None;
    }
    let reversed: Vec<&str> = rest.iter().rev().map(String::as_str).collect();
    Some(reversed.join("."))
}

/// Parse a decimal millisecond timestamp; rejects non-positive values.
pub fn parse_expiration(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().filter(|ms| *ms > 0)
}

/// Rebuild the remote key labels for a tracked name.
pub fn key_labels(name: &str, root_label: &str) -> Vec<String> {
    std::iter::once(root_label.to_string())
        .chain(name.rsplit('.').map(str::to_string))
        .collect()
}
