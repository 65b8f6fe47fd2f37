//! The cache core (C7): open/recover, and every public operation. Holds a
//! single exclusive lock over all mutable state, matching spec.md §5.

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use log::warn;

use crate::editor::Editor;
use crate::entry::Entry;
use crate::error::Error;
use crate::journal::Journal;
use crate::key;
use crate::lru_index::LruIndex;
use crate::snapshot::Snapshot;
use crate::task_runner::TaskRunner;

type Result<T> = std::result::Result<T, Error>;

/// Number of redundant (superseded) journal lines at or above which
/// compaction becomes eligible, alongside the `>= |index|` condition.
const COMPACTION_REDUNDANCY_THRESHOLD: u64 = 2000;

struct Shared {
    dir: PathBuf,
    app_version: u32,
    value_count: usize,
    max_size: i64,
    size: i64,
    index: LruIndex,
    journal: Journal,
    redundant_op_count: u64,
    next_sequence_number: u64,
    closed: bool,
}

struct CacheInner {
    shared: Mutex<Shared>,
    task_runner: TaskRunner,
}

/// A bounded, crash-tolerant, on-disk LRU cache.
///
/// Cheaply `Clone`-able; every clone shares the same underlying state and
/// the same single exclusive lock, so the handle can be passed across
/// threads and into background cleanup jobs.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl Cache {
    /// Opens (creating if necessary) the cache directory at `dir`.
    ///
    /// `app_version` is an opaque caller-chosen version stamped into the
    /// journal header; a cache opened with a different `app_version` or
    /// `value_count` than the one recorded on disk is treated as corrupt
    /// and reinitialized from scratch. Fails with [`Error::IllegalArgument`]
    /// if `value_count == 0` or `max_size <= 0`.
    pub fn open(
        dir: impl Into<PathBuf>,
        app_version: u32,
        value_count: usize,
        max_size: i64,
    ) -> Result<Cache> {
        if value_count == 0 {
            return Err(Error::IllegalArgument("value_count must be positive".into()));
        }
        if max_size <= 0 {
            return Err(Error::IllegalArgument("maxSize must be positive".into()));
        }

        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let (journal, recovered) = Journal::open_or_recover(&dir, app_version, value_count)?;

        let shared = Shared {
            dir,
            app_version,
            value_count,
            max_size,
            size: recovered.size,
            index: recovered.index,
            journal,
            redundant_op_count: 0,
            next_sequence_number: 1,
            closed: false,
        };

        Ok(Cache {
            inner: Arc::new(CacheInner {
                shared: Mutex::new(shared),
                task_runner: TaskRunner::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.shared.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Returns a snapshot of `key`'s values, or `None` if the key is absent
    /// or has never had a complete set of values committed.
    pub fn get(&self, key: &str) -> Result<Option<Snapshot>> {
        key::validate(key)?;
        let mut shared = self.lock();
        check_open(&shared)?;

        let entry = match shared.index.peek(key) {
            Some(e) if e.readable => e.clone(),
            _ => return Ok(None),
        };

        // Cheap existence check only: an absent clean file means the
        // entry's values are gone, with no promotion or journal entry.
        for i in 0..shared.value_count {
            if !entry.clean_path(&shared.dir, i).exists() {
                return Ok(None);
            }
        }

        // Promote to MRU and record the READ before opening any stream, so
        // a later open failure still leaves the promotion in effect
        // (spec.md §9: "the LRU promotion has already taken effect").
        shared.index.touch(key);
        shared.journal.append_read(key)?;
        shared.redundant_op_count += 1;
        maybe_enqueue_cleanup(self, &mut shared);

        let mut files = Vec::with_capacity(shared.value_count);
        for i in 0..shared.value_count {
            files.push(File::open(entry.clean_path(&shared.dir, i))?);
        }

        Ok(Some(Snapshot::new(
            self.clone(),
            key.to_string(),
            entry.sequence_number,
            files,
            entry.lengths,
        )))
    }

    /// Opens an exclusive editor for `key`, creating the entry if absent.
    ///
    /// Equivalent to `edit_if_sequence(key, None)`: no staleness check.
    pub fn edit(&self, key: &str) -> Result<Option<Editor>> {
        self.edit_if_sequence(key, None)
    }

    /// Opens an exclusive editor for `key`, failing with `None` if
    /// `expected_sequence` is given and does not match the entry's current
    /// sequence number (or the entry does not exist).
    pub(crate) fn edit_if_sequence(
        &self,
        key: &str,
        expected_sequence: Option<u64>,
    ) -> Result<Option<Editor>> {
        key::validate(key)?;
        let mut shared = self.lock();
        check_open(&shared)?;

        match shared.index.peek(key) {
            Some(entry) => {
                if let Some(expected) = expected_sequence {
                    if entry.sequence_number != expected {
                        return Ok(None);
                    }
                }
                if entry.editor_open {
                    return Ok(None);
                }
                shared.index.touch(key);
            }
            None => {
                if expected_sequence.is_some() {
                    return Ok(None);
                }
                let value_count = shared.value_count;
                shared.index.insert_mru(Entry::new(key.to_string(), value_count));
            }
        }

        shared.index.peek_mut(key).unwrap().editor_open = true;
        shared.journal.append_dirty(key)?;

        Ok(Some(Editor::new(self.clone(), key.to_string(), shared.value_count)))
    }

    /// Removes `key`. Returns `false` if the key is absent or currently
    /// under edit.
    pub fn remove(&self, key: &str) -> Result<bool> {
        key::validate(key)?;
        let mut shared = self.lock();
        check_open(&shared)?;

        let entry = match shared.index.peek(key) {
            Some(e) if !e.editor_open => e.clone(),
            _ => return Ok(false),
        };

        for i in 0..shared.value_count {
            let path = entry.clean_path(&shared.dir, i);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        shared.size -= entry.total_len() as i64;
        shared.index.remove(key);
        shared.journal.append_remove(key)?;
        shared.redundant_op_count += 1;
        maybe_enqueue_cleanup(self, &mut shared);

        Ok(true)
    }

    /// Current total size of all readable entries' values.
    pub fn size(&self) -> i64 {
        self.lock().size
    }

    /// Current byte budget.
    pub fn max_size(&self) -> i64 {
        self.lock().max_size
    }

    /// Updates the byte budget and schedules a cleanup pass.
    pub fn set_max_size(&self, max_size: i64) -> Result<()> {
        if max_size <= 0 {
            return Err(Error::IllegalArgument("maxSize must be positive".into()));
        }
        let mut shared = self.lock();
        shared.max_size = max_size;
        maybe_enqueue_cleanup(self, &mut shared);
        Ok(())
    }

    /// Trims to size synchronously, then flushes the journal.
    pub fn flush(&self) -> Result<()> {
        let mut shared = self.lock();
        check_open(&shared)?;
        trim_to_size(&mut shared)?;
        shared.journal.flush()?;
        Ok(())
    }

    /// Idempotent. Aborts every outstanding editor, trims to size, and
    /// stops accepting further operations.
    pub fn close(&self) -> Result<()> {
        let mut shared = self.lock();
        if shared.closed {
            return Ok(());
        }

        for key in shared.index.keys_snapshot() {
            let editor_open = shared.index.peek(&key).map(|e| e.editor_open).unwrap_or(false);
            if editor_open {
                if let Err(e) = force_abort(&mut shared, &key) {
                    warn!("failed to abort in-flight edit of {:?} on close: {}", key, e);
                }
            }
        }

        trim_to_size(&mut shared)?;
        shared.journal.flush()?;
        shared.closed = true;
        Ok(())
    }

    /// Closes the cache, then recursively deletes everything in its
    /// directory.
    pub fn delete(&self) -> Result<()> {
        self.close()?;
        let shared = self.lock();
        if shared.dir.exists() {
            for entry in fs::read_dir(&shared.dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    fs::remove_dir_all(&path)?;
                } else {
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// The `appVersion` recorded in the journal header.
    pub fn app_version(&self) -> u32 {
        self.lock().app_version
    }

    /// `V`, the number of independent values per entry.
    pub fn value_count(&self) -> usize {
        self.lock().value_count
    }

    /// The cache's backing directory.
    pub(crate) fn directory(&self) -> PathBuf {
        self.lock().dir.clone()
    }

    /// Opens the last committed value at index `i` for `key`, or `None` if
    /// the entry is absent or has never been readable. Used by `Editor` to
    /// read a value unaffected by its own in-flight dirty writes.
    pub(crate) fn clean_file_if_readable(&self, key: &str, i: usize) -> Result<Option<File>> {
        let shared = self.lock();
        match shared.index.peek(key) {
            Some(entry) if entry.readable => {
                Ok(File::open(entry.clean_path(&shared.dir, i)).ok())
            }
            _ => Ok(None),
        }
    }

    /// Finalizes an edit: commit on success, revert/remove on failure.
    /// Shared by `Editor::commit` and `Editor::abort`.
    pub(crate) fn complete_edit(
        &self,
        key: &str,
        written: &[bool],
        has_errors: bool,
        is_commit: bool,
    ) -> Result<()> {
        let mut shared = self.lock();

        let entry = shared
            .index
            .peek(key)
            .cloned()
            .filter(|e| e.editor_open)
            .ok_or_else(|| Error::IllegalState("no active editor for this entry".into()))?;

        if is_commit && !has_errors {
            if !entry.readable {
                for (i, &w) in written.iter().enumerate() {
                    if !w {
                        force_abort(&mut shared, key)?;
                        return Err(Error::IllegalState(format!(
                            "didn't create value for index {}",
                            i
                        )));
                    }
                }
                for i in 0..shared.value_count {
                    if !entry.dirty_path(&shared.dir, i).exists() {
                        // Spec-mandated silent abort: no journal line, no error.
                        silent_abort(&mut shared, key)?;
                        return Ok(());
                    }
                }
            }
            commit_success(self, &mut shared, key, entry)
        } else if has_errors {
            // A failed write downgrades even a previously-good entry to removed.
            fail_and_remove(&mut shared, key)
        } else {
            fail_revert(&mut shared, key, entry)
        }
    }
}

fn check_open(shared: &Shared) -> Result<()> {
    if shared.closed {
        Err(Error::IllegalState("cache is closed".into()))
    } else {
        Ok(())
    }
}

fn should_compact(shared: &Shared) -> bool {
    shared.redundant_op_count >= COMPACTION_REDUNDANCY_THRESHOLD
        && shared.redundant_op_count >= shared.index.len() as u64
}

fn maybe_enqueue_cleanup(cache: &Cache, shared: &mut Shared) {
    if shared.size > shared.max_size || should_compact(shared) {
        let cache = cache.clone();
        cache.inner.task_runner.submit(move || cache.run_cleanup());
    }
}

impl Cache {
    fn run_cleanup(&self) {
        let mut shared = self.lock();
        if shared.closed {
            return;
        }
        if let Err(e) = trim_to_size(&mut shared) {
            warn!("background trim failed: {}", e);
            return;
        }
        if should_compact(&shared) {
            let index = clone_index_for_compaction(&shared.index);
            if let Err(e) = shared.journal.compact(&index) {
                warn!("background journal compaction failed: {}", e);
            } else {
                shared.redundant_op_count = 0;
            }
        }
    }
}

fn clone_index_for_compaction(index: &LruIndex) -> LruIndex {
    let mut copy = LruIndex::new();
    for (_, entry) in index.iter() {
        copy.insert_mru(entry.clone());
    }
    copy
}

fn trim_to_size(shared: &mut Shared) -> Result<()> {
    loop {
        if shared.size <= shared.max_size {
            return Ok(());
        }
        let victim = shared
            .index
            .iter()
            .find(|(_, e)| e.readable && !e.editor_open)
            .map(|(k, _)| k.clone());

        let Some(key) = victim else {
            // Nothing evictable (every remaining entry is mid-edit); the
            // spec accepts transiently exceeding maxSize.
            return Ok(());
        };

        let entry = shared.index.peek(&key).unwrap().clone();
        for i in 0..shared.value_count {
            let path = entry.clean_path(&shared.dir, i);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        shared.size -= entry.total_len() as i64;
        shared.index.remove(&key);
        shared.journal.append_remove(&key)?;
        shared.redundant_op_count += 1;
    }
}

fn delete_dirty_files(shared: &Shared, key: &str, entry: &Entry) -> Result<()> {
    for i in 0..shared.value_count {
        let path = entry.dirty_path(&shared.dir, i);
        if path.exists() {
            fs::remove_file(&path)?;
        }
    }
    let _ = key;
    Ok(())
}

/// Reverts an edit: if the entry was never readable, removes it and
/// appends `REMOVE`; otherwise leaves its prior clean values in place and
/// appends `CLEAN` with the unchanged lengths.
///
/// This does not reposition the entry in the LRU index: commit/abort are
/// not promoting events (spec.md §3) — only `get`, `edit`-open, and a
/// replayed `READ` move a key to MRU.
fn fail_revert(shared: &mut Shared, key: &str, entry: Entry) -> Result<()> {
    delete_dirty_files(shared, key, &entry)?;

    if !entry.readable {
        shared.index.remove(key);
        shared.journal.append_remove(key)?;
    } else {
        let lengths = entry.lengths.clone();
        if let Some(e) = shared.index.peek_mut(key) {
            e.editor_open = false;
        }
        shared.journal.append_clean(key, &lengths)?;
    }
    shared.redundant_op_count += 1;
    Ok(())
}

/// Unconditionally removes the entry (used when an editor's output stream
/// saw an I/O error, or when forcing an abort with no entry handle).
fn fail_and_remove(shared: &mut Shared, key: &str) -> Result<()> {
    if let Some(entry) = shared.index.peek(key).cloned() {
        delete_dirty_files(shared, key, &entry)?;
        shared.size -= entry.total_len() as i64;
    }
    shared.index.remove(key);
    shared.journal.append_remove(key)?;
    shared.redundant_op_count += 1;
    Ok(())
}

/// Used by `Cache::close` to abort an in-flight edit the cache owns
/// authority over, without needing the client's `Editor` handle.
fn force_abort(shared: &mut Shared, key: &str) -> Result<()> {
    let entry = shared
        .index
        .peek(key)
        .cloned()
        .ok_or_else(|| Error::IllegalState("no active editor for this entry".into()))?;
    fail_revert(shared, key, entry)
}

/// The spec's one documented deviation: a missing dirty file on a
/// first-ever publish aborts with no journal line and no error.
fn silent_abort(shared: &mut Shared, key: &str) -> Result<()> {
    if let Some(entry) = shared.index.peek(key).cloned() {
        delete_dirty_files(shared, key, &entry)?;
    }
    shared.index.remove(key);
    Ok(())
}

/// Does not reposition the entry in the LRU index — see the note on
/// `fail_revert`; an existing entry's map position is fixed at `edit()`-open
/// and untouched by commit completion.
fn commit_success(cache: &Cache, shared: &mut Shared, key: &str, mut entry: Entry) -> Result<()> {
    for i in 0..shared.value_count {
        let dirty = entry.dirty_path(&shared.dir, i);
        if dirty.exists() {
            let clean = entry.clean_path(&shared.dir, i);
            if clean.exists() {
                fs::remove_file(&clean)?;
            }
            fs::rename(&dirty, &clean)?;
            let new_len = fs::metadata(&clean)?.len();
            shared.size += new_len as i64 - entry.lengths[i] as i64;
            entry.lengths[i] = new_len;
        }
        // else: dirty file absent on a partial update — retain the prior
        // clean file and length untouched.
    }

    entry.readable = true;
    entry.editor_open = false;
    entry.sequence_number = shared.next_sequence_number;
    shared.next_sequence_number += 1;

    let lengths = entry.lengths.clone();
    // The entry is already in the index, at the position `edit()`-open put
    // it; update its fields in place rather than re-inserting at MRU.
    if let Some(e) = shared.index.peek_mut(key) {
        *e = entry;
    }
    shared.journal.append_clean(key, &lengths)?;
    shared.redundant_op_count += 1;

    maybe_enqueue_cleanup(cache, shared);
    Ok(())
}
