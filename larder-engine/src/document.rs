//! Document-level steps shared by the sync and async facade paths.

use larder_core::path;
use larder_core::{Entry, JsonValue, RetrievedEntry, Segment, TimestampMs};

/// The entry a `set` of `value` at `rest` produces from `existing`.
pub(crate) fn place(
    existing: Option<Entry>,
    rest: &[Segment],
    value: JsonValue,
    expires_at: TimestampMs,
) -> Entry {
    let mut doc = existing.map(|entry| entry.value).unwrap_or(JsonValue::Null);
    path::write(&mut doc, rest, value);
    Entry::new(doc, expires_at)
}

/// The value at `rest` inside `entry`, observed at `now`.
pub(crate) fn extract(entry: &Entry, rest: &[Segment], now: TimestampMs) -> Option<RetrievedEntry> {
    path::read(&entry.value, rest).map(|value| entry.observe(value.clone(), now))
}

/// What an `unset` at a path does to the root entry.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UnsetPlan {
    Unchanged,
    DeleteRoot,
    Replace(Entry),
}

pub(crate) fn plan_unset(entry: Entry, rest: &[Segment]) -> UnsetPlan {
    if rest.is_empty() {
        return UnsetPlan::DeleteRoot;
    }

    let mut doc = entry.value;
    let removal = path::remove(&mut doc, rest);
    if !removal.removed {
        UnsetPlan::Unchanged
    } else if removal.remaining_empty {
        UnsetPlan::DeleteRoot
    } else {
        UnsetPlan::Replace(Entry::new(doc, entry.expires_at))
    }
}
