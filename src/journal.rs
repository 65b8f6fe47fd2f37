//! The append-only textual journal: header, body grammar, compaction, and
//! the crash-safe tmp-file + backup-file swap.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::entry::{clean_path, dirty_path, Entry};
use crate::error::Error;
use crate::line_reader::StrictLineReader;
use crate::lru_index::LruIndex;

const MAGIC: &str = "libcore.io.DiskLruCache";
const JOURNAL_VERSION: &str = "1";

pub const JOURNAL_FILE: &str = "journal";
pub const JOURNAL_TMP_FILE: &str = "journal.tmp";
pub const JOURNAL_BACKUP_FILE: &str = "journal.bkp";

fn journal_path(dir: &Path) -> PathBuf {
    dir.join(JOURNAL_FILE)
}
fn tmp_path(dir: &Path) -> PathBuf {
    dir.join(JOURNAL_TMP_FILE)
}
fn backup_path(dir: &Path) -> PathBuf {
    dir.join(JOURNAL_BACKUP_FILE)
}

/// A single parsed journal body line.
#[derive(Debug, PartialEq, Eq)]
enum Op {
    Dirty(String),
    Clean(String, Vec<u64>),
    Read(String),
    Remove(String),
}

/// Result of reconciling the journal and filesystem at open time.
pub struct Recovered {
    pub index: LruIndex,
    pub size: i64,
}

/// The live, appending handle onto `<dir>/journal`.
pub struct Journal {
    dir: PathBuf,
    app_version: u32,
    value_count: usize,
    writer: BufWriter<File>,
}

impl Journal {
    /// Opens or rebuilds the journal per spec.md §4.6 / §4.3 crash-safety
    /// rules, replaying its body into a fresh [`LruIndex`].
    ///
    /// On any corruption, wipes the directory and reinitializes with a
    /// fresh, empty journal rather than surfacing an error from `open`.
    pub fn open_or_recover(
        dir: &Path,
        app_version: u32,
        value_count: usize,
    ) -> Result<(Journal, Recovered), Error> {
        reconcile_backup(dir)?;

        let main = journal_path(dir);
        if main.exists() {
            match replay(&main, app_version, value_count) {
                Ok(recovered) => {
                    let writer = open_appender(&main)?;
                    let journal = Journal {
                        dir: dir.to_path_buf(),
                        app_version,
                        value_count,
                        writer,
                    };
                    return Ok((journal, recovered));
                }
                Err(Error::Corrupt(reason)) => {
                    warn!("journal at {:?} is corrupt ({}), rebuilding", dir, reason);
                    wipe_directory(dir)?;
                }
                Err(e) => return Err(e),
            }
        }

        fs::create_dir_all(dir)?;
        let index = LruIndex::new();
        let writer = rebuild(dir, app_version, value_count, &index)?;
        let journal = Journal {
            dir: dir.to_path_buf(),
            app_version,
            value_count,
            writer,
        };
        Ok((journal, Recovered { index, size: 0 }))
    }

    /// Appends `DIRTY k` and flushes durably before returning.
    pub fn append_dirty(&mut self, key: &str) -> Result<(), Error> {
        writeln!(self.writer, "DIRTY {}", key)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Appends `CLEAN k l0 l1 ... l_{V-1}` and flushes durably.
    pub fn append_clean(&mut self, key: &str, lengths: &[u64]) -> Result<(), Error> {
        write!(self.writer, "CLEAN {}", key)?;
        for len in lengths {
            write!(self.writer, " {}", len)?;
        }
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Appends `REMOVE k` and flushes durably.
    pub fn append_remove(&mut self, key: &str) -> Result<(), Error> {
        writeln!(self.writer, "REMOVE {}", key)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Appends `READ k`. May remain buffered.
    pub fn append_read(&mut self, key: &str) -> Result<(), Error> {
        writeln!(self.writer, "READ {}", key)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.writer.flush()?;
        Ok(())
    }

    /// Rewrites the journal to contain only the header and one line per
    /// live entry (`DIRTY` for an entry with an editor in flight, else
    /// `CLEAN`), via the tmp-file + rename sequence of spec.md §4.3.
    pub fn compact(&mut self, index: &LruIndex) -> Result<(), Error> {
        let now = std::time::Instant::now();
        self.writer = rebuild(&self.dir, self.app_version, self.value_count, index)?;
        info!("journal compaction finished in {:?}", now.elapsed());
        Ok(())
    }
}

fn reconcile_backup(dir: &Path) -> Result<(), Error> {
    let bkp = backup_path(dir);
    if !bkp.exists() {
        return Ok(());
    }
    let main = journal_path(dir);
    if main.exists() {
        fs::remove_file(&bkp)?;
    } else {
        atomic_rename(&bkp, &main)?;
    }
    Ok(())
}

fn atomic_rename(from: &Path, to: &Path) -> std::io::Result<()> {
    if to.exists() {
        fs::remove_file(to)?;
    }
    fs::rename(from, to)
}

fn open_appender(path: &Path) -> Result<BufWriter<File>, Error> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Writes a fresh journal (header + one line per live entry) to
/// `journal.tmp`, then performs the crash-safe swap into `journal`,
/// returning a freshly opened append writer.
fn rebuild(
    dir: &Path,
    app_version: u32,
    value_count: usize,
    index: &LruIndex,
) -> Result<BufWriter<File>, Error> {
    fs::create_dir_all(dir)?;
    let tmp = tmp_path(dir);
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer, app_version, value_count)?;
        for (key, entry) in index.iter() {
            if entry.editor_open {
                writeln!(writer, "DIRTY {}", key)?;
            } else {
                write!(writer, "CLEAN {}", key)?;
                for len in &entry.lengths {
                    write!(writer, " {}", len)?;
                }
                writeln!(writer)?;
            }
        }
        writer.flush()?;
    }

    let main = journal_path(dir);
    if main.exists() {
        atomic_rename(&main, &backup_path(dir))?;
    }
    atomic_rename(&tmp, &main)?;
    let bkp = backup_path(dir);
    if bkp.exists() {
        fs::remove_file(&bkp)?;
    }

    open_appender(&main)
}

fn write_header<W: Write>(w: &mut W, app_version: u32, value_count: usize) -> std::io::Result<()> {
    writeln!(w, "{}", MAGIC)?;
    writeln!(w, "{}", JOURNAL_VERSION)?;
    writeln!(w, "{}", app_version)?;
    writeln!(w, "{}", value_count)?;
    writeln!(w)?;
    Ok(())
}

/// Parses the header and replays the body of `path`, reconciling
/// placeholder (`DIRTY`-only) entries against the filesystem.
fn replay(path: &Path, app_version: u32, value_count: usize) -> Result<Recovered, Error> {
    let file = File::open(path)?;
    let mut reader = StrictLineReader::new(file);

    let expect = [
        MAGIC.to_string(),
        JOURNAL_VERSION.to_string(),
        app_version.to_string(),
        value_count.to_string(),
        String::new(),
    ];
    for want in &expect {
        let got = reader
            .read_line()?
            .ok_or_else(|| Error::Corrupt("truncated header".to_string()))?;
        if &got != want {
            return Err(Error::Corrupt(format!(
                "header mismatch: expected {:?}, got {:?}",
                want, got
            )));
        }
    }

    let mut index = LruIndex::new();
    while let Some(line) = reader.read_line()? {
        let op = parse_op(&line, value_count)?;
        apply_op(&mut index, op, value_count);
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let size = reconcile_placeholders(dir, &mut index, value_count)?;

    Ok(Recovered { index, size })
}

fn parse_op(line: &str, value_count: usize) -> Result<Op, Error> {
    let mut parts = line.split(' ');
    let verb = parts
        .next()
        .ok_or_else(|| Error::Corrupt("empty journal line".to_string()))?;

    match verb {
        "DIRTY" => {
            let key = next_key(&mut parts, line)?;
            ensure_exhausted(&mut parts, line)?;
            Ok(Op::Dirty(key))
        }
        "READ" => {
            let key = next_key(&mut parts, line)?;
            ensure_exhausted(&mut parts, line)?;
            Ok(Op::Read(key))
        }
        "REMOVE" => {
            let key = next_key(&mut parts, line)?;
            ensure_exhausted(&mut parts, line)?;
            Ok(Op::Remove(key))
        }
        "CLEAN" => {
            let key = next_key(&mut parts, line)?;
            let lengths: Vec<&str> = parts.collect();
            if lengths.len() != value_count {
                return Err(Error::Corrupt(format!(
                    "CLEAN line has {} lengths, expected {}: {:?}",
                    lengths.len(),
                    value_count,
                    line
                )));
            }
            let lengths = lengths
                .into_iter()
                .map(|s| {
                    s.parse::<u64>()
                        .map_err(|_| Error::Corrupt(format!("non-decimal length {:?}", s)))
                })
                .collect::<Result<Vec<u64>, Error>>()?;
            Ok(Op::Clean(key, lengths))
        }
        other => Err(Error::Corrupt(format!("unknown journal verb {:?}", other))),
    }
}

fn next_key<'a>(
    parts: &mut std::str::Split<'a, char>,
    line: &str,
) -> Result<String, Error> {
    let key = parts
        .next()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| Error::Corrupt(format!("missing key in journal line {:?}", line)))?;
    Ok(key.to_string())
}

fn ensure_exhausted(parts: &mut std::str::Split<'_, char>, line: &str) -> Result<(), Error> {
    if parts.next().is_some() {
        return Err(Error::Corrupt(format!("trailing tokens in line {:?}", line)));
    }
    Ok(())
}

fn apply_op(index: &mut LruIndex, op: Op, value_count: usize) {
    match op {
        Op::Clean(key, lengths) => {
            let mut entry = index.remove(&key).unwrap_or_else(|| Entry::new(key.clone(), value_count));
            entry.readable = true;
            entry.editor_open = false;
            entry.lengths = lengths;
            index.insert_mru(entry);
        }
        Op::Dirty(key) => {
            let mut entry = index.remove(&key).unwrap_or_else(|| Entry::new(key.clone(), value_count));
            entry.editor_open = true;
            index.insert_mru(entry);
        }
        Op::Remove(key) => {
            index.remove(&key);
        }
        Op::Read(key) => {
            index.touch(&key);
        }
    }
}

/// For every entry left with an open placeholder editor (an unterminated
/// `DIRTY` from a crash mid-edit), clears the placeholder, deletes any
/// partial files, and drops the entry. Returns the total size of the
/// surviving readable entries.
fn reconcile_placeholders(
    dir: &Path,
    index: &mut LruIndex,
    value_count: usize,
) -> Result<i64, Error> {
    let mut size: i64 = 0;
    let keys = index.keys_snapshot();
    for key in keys {
        let editor_open = index.peek(&key).map(|e| e.editor_open).unwrap_or(false);
        if editor_open {
            for i in 0..value_count {
                let _ = fs::remove_file(clean_path(dir, &key, i));
                let _ = fs::remove_file(dirty_path(dir, &key, i));
            }
            index.remove(&key);
        } else if let Some(entry) = index.peek(&key) {
            size += entry.total_len() as i64;
        }
    }
    Ok(size)
}

fn wipe_directory(dir: &Path) -> Result<(), Error> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
