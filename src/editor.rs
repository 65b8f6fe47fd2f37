//! Editor (C5): the exclusive, transactional handle for mutating an
//! entry's values. State machine per spec.md §4.4: `Open -> Committed` or
//! `Open -> Aborted`; once left `Open`, every operation fails illegal-state.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::Cache;
use crate::entry::dirty_path;
use crate::error::Error;

type Result<T> = std::result::Result<T, Error>;

/// Exclusive handle for writing an entry's values. Dropping an `Editor`
/// that was neither committed nor aborted aborts it.
pub struct Editor {
    cache: Cache,
    key: String,
    value_count: usize,
    written: Vec<bool>,
    has_errors: Arc<AtomicBool>,
    done: bool,
}

impl Editor {
    pub(crate) fn new(cache: Cache, key: String, value_count: usize) -> Self {
        Editor {
            cache,
            key,
            value_count,
            written: vec![false; value_count],
            has_errors: Arc::new(AtomicBool::new(false)),
            done: false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.done {
            Err(Error::IllegalState("editor is no longer open".into()))
        } else if self.cache.is_closed() {
            Err(Error::IllegalState("cache is closed".into()))
        } else {
            Ok(())
        }
    }

    fn check_index(&self, i: usize) -> Result<()> {
        if i >= self.value_count {
            Err(Error::IllegalArgument(format!(
                "value index {} out of range [0, {})",
                i, self.value_count
            )))
        } else {
            Ok(())
        }
    }

    /// Opens an output stream for value `i`. Marks `written[i]`; failures
    /// to write, flush, or close the returned stream are swallowed and
    /// instead flip this editor's `hasErrors` flag, per spec.md's silent
    /// absorption of output errors.
    pub fn new_output_stream(&mut self, i: usize) -> Result<FaultHidingWriter> {
        self.check_open()?;
        self.check_index(i)?;
        let path = dirty_path(&self.cache_dir(), &self.key, i);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = match File::create(&path) {
            Ok(f) => f,
            Err(e) => {
                self.has_errors.store(true, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        self.written[i] = true;
        Ok(FaultHidingWriter {
            file,
            has_errors: Arc::clone(&self.has_errors),
        })
    }

    /// Writes `s` as the complete contents of value `i`, a convenience
    /// wrapper over [`Editor::new_output_stream`].
    pub fn set(&mut self, i: usize, s: &str) -> Result<()> {
        let mut out = self.new_output_stream(i)?;
        let _ = out.write_all(s.as_bytes());
        let _ = out.flush();
        Ok(())
    }

    /// Opens the last *committed* value at index `i`, or `None` if the
    /// entry has never been readable. Unaffected by writes made through
    /// this same editor that have not yet been committed.
    pub fn new_input_stream(&self, i: usize) -> Result<Option<File>> {
        self.check_open()?;
        self.check_index(i)?;
        let shared_snapshot = self.cache.clean_file_if_readable(&self.key, i)?;
        Ok(shared_snapshot)
    }

    /// Reads the last committed value at index `i` as a `String`.
    pub fn get_string(&self, i: usize) -> Result<Option<String>> {
        match self.new_input_stream(i)? {
            Some(mut f) => {
                let mut s = String::new();
                f.read_to_string(&mut s)?;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }

    /// Atomically publishes the edit. See `Cache::complete_edit` for the
    /// full commit/abort decision tree.
    pub fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        let has_errors = self.has_errors.load(Ordering::SeqCst);
        let result = self.cache.complete_edit(&self.key, &self.written, has_errors, true);
        self.done = true;
        result
    }

    /// Discards all dirty files; removes the entry if this was its first
    /// edit, otherwise reverts to the prior committed values.
    ///
    /// Unlike `commit`, this ignores `hasErrors`: the caller is choosing to
    /// discard the edit regardless of whether any write actually failed.
    pub fn abort(&mut self) -> Result<()> {
        self.check_open()?;
        let result = self.cache.complete_edit(&self.key, &self.written, false, false);
        self.done = true;
        result
    }

    /// Aborts unless already committed or aborted. Called automatically
    /// on drop; errors are logged, not propagated (there is no caller left
    /// to hand them to).
    pub fn abort_unless_committed(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.abort() {
            log::warn!("failed to abort editor for {:?} on drop: {}", self.key, e);
        }
    }

    fn cache_dir(&self) -> std::path::PathBuf {
        self.cache.directory()
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        self.abort_unless_committed();
    }
}

/// An output stream that never raises on write/flush/close failure;
/// instead it flips a shared `hasErrors` flag observed at commit time.
pub struct FaultHidingWriter {
    file: File,
    has_errors: Arc<AtomicBool>,
}

impl Write for FaultHidingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.write_all(buf) {
            Ok(()) => Ok(buf.len()),
            Err(_) => {
                self.has_errors.store(true, Ordering::SeqCst);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.file.flush().is_err() {
            self.has_errors.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}
