use std::path::{Path, PathBuf};

/// Per-key record: value lengths, readability, the in-flight editor (if
/// any), and the sequence number used to detect stale snapshots.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: String,
    /// Byte length of each committed value; zero until first commit.
    pub lengths: Vec<u64>,
    /// True iff a complete set of values has ever been committed.
    pub readable: bool,
    /// Whether an `Editor` currently holds this entry's edit slot.
    pub editor_open: bool,
    /// Bumped on every successful commit; used to detect stale snapshots.
    pub sequence_number: u64,
}

impl Entry {
    pub fn new(key: String, value_count: usize) -> Self {
        Entry {
            key,
            lengths: vec![0; value_count],
            readable: false,
            editor_open: false,
            sequence_number: 0,
        }
    }

    /// Path of the published, clean file for value index `i`.
    pub fn clean_path(&self, dir: &Path, i: usize) -> PathBuf {
        clean_path(dir, &self.key, i)
    }

    /// Path of the in-progress, staging file for value index `i`.
    pub fn dirty_path(&self, dir: &Path, i: usize) -> PathBuf {
        dirty_path(dir, &self.key, i)
    }

    /// Sum of this entry's committed value lengths.
    pub fn total_len(&self) -> u64 {
        self.lengths.iter().sum()
    }
}

pub fn clean_path(dir: &Path, key: &str, i: usize) -> PathBuf {
    dir.join(format!("{}.{}", key, i))
}

pub fn dirty_path(dir: &Path, key: &str, i: usize) -> PathBuf {
    dir.join(format!("{}.{}.tmp", key, i))
}
