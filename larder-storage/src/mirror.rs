//! In-process mirror of root entries.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use larder_core::{Entry, LarderResult, Notification, StorageError};

/// Entries plus a change counter.
///
/// `touched` records the generation of the last change to each key and
/// `reset_at` the generation of the last wholesale change. Both let a reader
/// that loaded data outside the lock tell whether the mirror moved on since.
#[derive(Debug, Default)]
struct MirrorState {
    entries: HashMap<String, Entry>,
    generation: u64,
    touched: HashMap<String, u64>,
    reset_at: u64,
}

impl MirrorState {
    fn touch(&mut self, key: &str) {
        self.generation += 1;
        self.touched.insert(key.to_string(), self.generation);
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.reset_at = self.generation;
        self.touched.clear();
    }

    fn touched_since(&self, key: &str, since: u64) -> bool {
        self.touched.get(key).is_some_and(|at| *at > since)
    }
}

/// Thread-safe map of root key to entry.
///
/// Every backend variant serves synchronous reads from one of these.
#[derive(Debug, Default)]
pub struct Mirror {
    state: RwLock<MirrorState>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> LarderResult<RwLockReadGuard<'_, MirrorState>> {
        self.state
            .read()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write(&self) -> LarderResult<RwLockWriteGuard<'_, MirrorState>> {
        self.state
            .write()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Current change counter. Pass it back to [`Mirror::fill`] or
    /// [`Mirror::merge_snapshot`] after loading from a durable store.
    pub fn generation(&self) -> LarderResult<u64> {
        Ok(self.read()?.generation)
    }

    pub fn get(&self, key: &str) -> LarderResult<Option<Entry>> {
        Ok(self.read()?.entries.get(key).cloned())
    }

    pub fn contains(&self, key: &str) -> LarderResult<bool> {
        Ok(self.read()?.entries.contains_key(key))
    }

    pub fn insert(&self, key: &str, entry: Entry) -> LarderResult<()> {
        let mut state = self.write()?;
        state.touch(key);
        state.entries.insert(key.to_string(), entry);
        Ok(())
    }

    /// Returns whether the key was present.
    pub fn remove(&self, key: &str) -> LarderResult<bool> {
        let mut state = self.write()?;
        state.touch(key);
        Ok(state.entries.remove(key).is_some())
    }

    /// Returns whether the mirror held anything.
    pub fn clear(&self) -> LarderResult<bool> {
        let mut state = self.write()?;
        let had_entries = !state.entries.is_empty();
        state.entries.clear();
        state.reset();
        Ok(had_entries)
    }

    /// Replace the whole content in one step.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = (String, Entry)>) -> LarderResult<()> {
        let fresh: HashMap<String, Entry> = entries.into_iter().collect();
        let mut state = self.write()?;
        state.entries = fresh;
        state.reset();
        Ok(())
    }

    /// Install a value fetched from a durable store at `since`, unless the
    /// key changed or the mirror was reset after that. Returns what the
    /// mirror holds for the key afterwards.
    pub fn fill(&self, key: &str, entry: Entry, since: u64) -> LarderResult<Option<Entry>> {
        let mut state = self.write()?;
        if state.reset_at > since || state.touched_since(key, since) {
            return Ok(state.entries.get(key).cloned());
        }
        if let Some(current) = state.entries.get(key) {
            return Ok(Some(current.clone()));
        }
        state.touch(key);
        state.entries.insert(key.to_string(), entry.clone());
        Ok(Some(entry))
    }

    /// Replace the content with a snapshot loaded at `since`, keeping every
    /// key changed after that point as it is now. A mirror reset after
    /// `since` is already newer than the snapshot and is left alone.
    ///
    /// Returns whether the snapshot was applied.
    pub fn merge_snapshot(
        &self,
        snapshot: impl IntoIterator<Item = (String, Entry)>,
        since: u64,
    ) -> LarderResult<bool> {
        let mut state = self.write()?;
        if state.reset_at > since {
            return Ok(false);
        }
        let mut fresh: HashMap<String, Entry> = snapshot
            .into_iter()
            .filter(|(key, _)| !state.touched_since(key, since))
            .collect();
        for (key, at) in &state.touched {
            if *at > since {
                if let Some(entry) = state.entries.get(key) {
                    fresh.insert(key.clone(), entry.clone());
                }
            }
        }
        state.entries = fresh;
        state.reset();
        Ok(true)
    }

    pub fn snapshot(&self) -> LarderResult<BTreeMap<String, Entry>> {
        Ok(self
            .read()?
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.read().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn approximate_byte_size(&self) -> usize {
        self.read()
            .map(|state| {
                state
                    .entries
                    .iter()
                    .map(|(key, entry)| entry.approximate_size(key))
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Apply a peer's change notification.
    pub fn apply(&self, notification: &Notification) -> LarderResult<()> {
        match notification {
            Notification::Sync { key, value } => self.insert(key, value.clone()),
            Notification::Unset { key } => self.remove(key).map(|_| ()),
            Notification::Clear => self.clear().map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_get_remove() {
        let mirror = Mirror::new();
        mirror.insert("a", Entry::persistent(json!(1))).unwrap();
        assert_eq!(mirror.get("a").unwrap().unwrap().value, json!(1));
        assert!(mirror.contains("a").unwrap());
        assert!(mirror.remove("a").unwrap());
        assert!(!mirror.remove("a").unwrap());
        assert!(mirror.get("a").unwrap().is_none());
    }

    #[test]
    fn test_clear_reports_previous_content() {
        let mirror = Mirror::new();
        assert!(!mirror.clear().unwrap());
        mirror.insert("a", Entry::persistent(json!(1))).unwrap();
        assert!(mirror.clear().unwrap());
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_apply_notifications() {
        let mirror = Mirror::new();
        mirror
            .apply(&Notification::Sync {
                key: "user".to_string(),
                value: Entry::new(json!({"name": "Jane"}), 0),
            })
            .unwrap();
        assert_eq!(mirror.len(), 1);

        mirror
            .apply(&Notification::Unset {
                key: "user".to_string(),
            })
            .unwrap();
        assert!(mirror.is_empty());

        mirror.insert("x", Entry::persistent(json!(true))).unwrap();
        mirror.apply(&Notification::Clear).unwrap();
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_approximate_byte_size_sums_entries() {
        let mirror = Mirror::new();
        let a = Entry::persistent(json!("x"));
        let b = Entry::new(json!([1, 2, 3]), 42);
        let expected = a.approximate_size("a") + b.approximate_size("bb");
        mirror.insert("a", a).unwrap();
        mirror.insert("bb", b).unwrap();
        assert_eq!(mirror.approximate_byte_size(), expected);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let mirror = Mirror::new();
        for key in ["c", "a", "b"] {
            mirror.insert(key, Entry::persistent(json!(key))).unwrap();
        }
        let keys: Vec<_> = mirror.snapshot().unwrap().into_keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fill_only_when_untouched() {
        let mirror = Mirror::new();
        let since = mirror.generation().unwrap();
        let filled = mirror.fill("a", Entry::persistent(json!("loaded")), since).unwrap();
        assert_eq!(filled.unwrap().value, json!("loaded"));

        // A local write after the load wins over the loaded value.
        let since = mirror.generation().unwrap();
        mirror.insert("b", Entry::persistent(json!("local"))).unwrap();
        let filled = mirror.fill("b", Entry::persistent(json!("stale")), since).unwrap();
        assert_eq!(filled.unwrap().value, json!("local"));

        // So does a local delete.
        let since = mirror.generation().unwrap();
        mirror.remove("c").unwrap();
        assert!(mirror.fill("c", Entry::persistent(json!("stale")), since).unwrap().is_none());
        assert!(!mirror.contains("c").unwrap());
    }

    #[test]
    fn test_fill_after_clear_is_dropped() {
        let mirror = Mirror::new();
        let since = mirror.generation().unwrap();
        mirror.clear().unwrap();
        assert!(mirror.fill("a", Entry::persistent(json!(1)), since).unwrap().is_none());
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_merge_snapshot_keeps_later_changes() {
        let mirror = Mirror::new();
        mirror.insert("gone", Entry::persistent(json!(0))).unwrap();
        mirror.insert("deleted", Entry::persistent(json!(0))).unwrap();
        let since = mirror.generation().unwrap();

        mirror.insert("mine", Entry::persistent(json!("local"))).unwrap();
        mirror.remove("deleted").unwrap();

        let snapshot = vec![
            ("mine".to_string(), Entry::persistent(json!("old"))),
            ("deleted".to_string(), Entry::persistent(json!("old"))),
            ("theirs".to_string(), Entry::persistent(json!("loaded"))),
        ];
        assert!(mirror.merge_snapshot(snapshot, since).unwrap());

        let keys: Vec<_> = mirror.snapshot().unwrap().into_keys().collect();
        assert_eq!(keys, vec!["mine", "theirs"]);
        assert_eq!(mirror.get("mine").unwrap().unwrap().value, json!("local"));
    }

    #[test]
    fn test_merge_snapshot_skipped_after_reset() {
        let mirror = Mirror::new();
        let since = mirror.generation().unwrap();
        mirror.clear().unwrap();
        mirror.insert("after", Entry::persistent(json!(1))).unwrap();

        let snapshot = vec![("before".to_string(), Entry::persistent(json!(0)))];
        assert!(!mirror.merge_snapshot(snapshot, since).unwrap());
        let keys: Vec<_> = mirror.snapshot().unwrap().into_keys().collect();
        assert_eq!(keys, vec!["after"]);
    }
}
