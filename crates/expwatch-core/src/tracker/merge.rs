//! Snapshot merge.

use super::record::TrackedRecord;
use super::window::Windows;
use std::collections::HashMap;

/// Merge `incoming` over `existing`, dropping records past the grace cutoff.
///
/// Incoming records replace existing ones with the same name. The result has
/// unique names and is sorted by expiration, then name.
pub fn merge<E, I>(existing: E, incoming: I, now_ms: i64, windows: &Windows) -> Vec<TrackedRecord>
where
    E: IntoIterator<Item = TrackedRecord>,
    I: IntoIterator<Item = TrackedRecord>,
{
    let mut by_name: HashMap<String, TrackedRecord> = HashMap::new();

    for record in existing.into_iter().chain(incoming) {
        if !windows.is_stale(record.expiration_ms, now_ms) {
            by_name.insert(record.name.clone(), record);
        }
    }

    let mut merged: Vec<TrackedRecord> = by_name.into_values().collect();
    sort_records(&mut merged);
    merged
}

/// Sort by expiration ascending, ties by name.
pub fn sort_records(records: &mut [TrackedRecord]) {
    records.sort_by(|a, b| {
        a.expiration_ms
            .cmp(&b.expiration_ms)
            .then_with(|| a.name.cmp(&b.name))
    });
}
