//! Snapshot (C6): an immutable view of an entry's values at a point in
//! time. Streams are opened eagerly at creation (by `Cache::get`) and
//! remain valid until explicit close, independent of later edits or
//! evictions.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::cache::Cache;
use crate::editor::Editor;
use crate::error::Error;

type Result<T> = std::result::Result<T, Error>;

/// A read-only handle to the values of an entry as of the moment it was
/// returned from [`Cache::get`](crate::Cache::get).
pub struct Snapshot {
    cache: Cache,
    key: String,
    sequence_number: u64,
    files: Vec<File>,
    lengths: Vec<u64>,
}

impl Snapshot {
    pub(crate) fn new(
        cache: Cache,
        key: String,
        sequence_number: u64,
        files: Vec<File>,
        lengths: Vec<u64>,
    ) -> Self {
        Snapshot {
            cache,
            key,
            sequence_number,
            files,
            lengths,
        }
    }

    fn check_index(&self, i: usize) -> Result<()> {
        if i >= self.files.len() {
            Err(Error::IllegalArgument(format!(
                "value index {} out of range [0, {})",
                i,
                self.files.len()
            )))
        } else {
            Ok(())
        }
    }

    /// Returns the open stream for value `i`, rewound to its start.
    pub fn input_stream(&mut self, i: usize) -> Result<&mut File> {
        self.check_index(i)?;
        self.files[i].seek(SeekFrom::Start(0))?;
        Ok(&mut self.files[i])
    }

    /// Reads value `i` as a `String`.
    pub fn string(&mut self, i: usize) -> Result<String> {
        let file = self.input_stream(i)?;
        let mut s = String::new();
        file.read_to_string(&mut s)?;
        Ok(s)
    }

    /// The byte length of value `i`, as recorded when this snapshot was
    /// taken.
    pub fn length(&self, i: usize) -> u64 {
        self.lengths[i]
    }

    /// Opens an editor for this snapshot's entry, but only if nothing has
    /// committed or removed it since this snapshot was taken (P7). Returns
    /// `None` on a stale snapshot, exactly like `Cache::edit` returning
    /// `None` for a key already under edit.
    pub fn edit(&self) -> Result<Option<Editor>> {
        self.cache.edit_if_sequence(&self.key, Some(self.sequence_number))
    }

    /// Closes every owned stream. Streams are also closed on drop; this
    /// method exists for callers that want to release file descriptors
    /// deterministically without waiting on drop order.
    pub fn close(self) {
        // `File`'s own `Drop` closes the descriptor and swallows any
        // close-time error, matching spec.md's "swallowing errors" note.
    }
}
