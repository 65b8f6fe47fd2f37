use indexmap::IndexMap;

use crate::entry::Entry;

/// Access-ordered `key -> Entry` map.
///
/// Front of the map is the least-recently-used key, back is most-recently
/// used. Every successful lookup (`get`/`get_mut`), `edit` open, and
/// journal-replayed `READ` promotes its key to the back via `shift_remove`
/// + re-`insert`, the same O(1)-amortized technique used by the `IndexMap`
/// based cache in the example pack.
#[derive(Default)]
pub struct LruIndex {
    map: IndexMap<String, Entry>,
}

impl LruIndex {
    pub fn new() -> Self {
        LruIndex {
            map: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Looks up `key` without promoting it. Used by code that wants to
    /// inspect an entry without touching LRU order (e.g. validating state
    /// before deciding whether the lookup even counts as an access).
    pub fn peek(&self, key: &str) -> Option<&Entry> {
        self.map.get(key)
    }

    pub fn peek_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.map.get_mut(key)
    }

    /// Looks up `key`, promoting it to the most-recently-used position.
    pub fn touch(&mut self, key: &str) -> Option<&Entry> {
        let entry = self.map.shift_remove(key)?;
        self.map.insert(key.to_string(), entry);
        self.map.get(key)
    }

    /// Inserts or replaces an entry, placing it at the most-recently-used
    /// position.
    pub fn insert_mru(&mut self, entry: Entry) {
        let key = entry.key.clone();
        self.map.shift_remove(&key);
        self.map.insert(key, entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        self.map.shift_remove(key)
    }

    /// The current least-recently-used key, if any.
    pub fn lru_key(&self) -> Option<&str> {
        self.map.keys().next().map(String::as_str)
    }

    /// Iterates entries from least- to most-recently-used.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.map.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Entry)> {
        self.map.iter_mut()
    }

    /// Snapshot of all keys, in LRU-to-MRU order. Used where callers must
    /// iterate while mutating the index (e.g. aborting every open editor).
    pub fn keys_snapshot(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }
}
