use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::sync::WaitGroup;
use disklru::{Cache, Error};
use tempfile::tempdir;

const ANY_SIZE: i64 = i64::MAX;

#[test]
fn basic_commit_and_read() -> Result<(), Error> {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path(), 100, 2, ANY_SIZE)?;

    let mut editor = cache.edit("k1")?.unwrap();
    editor.set(0, "ABC")?;
    editor.set(1, "DE")?;
    editor.commit()?;

    let mut snapshot = cache.get("k1")?.unwrap();
    assert_eq!(snapshot.string(0)?, "ABC");
    assert_eq!(snapshot.string(1)?, "DE");
    assert_eq!(snapshot.length(0), 3);
    assert_eq!(snapshot.length(1), 2);

    cache.close()?;

    let journal = fs::read_to_string(dir.path().join("journal")).unwrap();
    assert_eq!(
        journal,
        "libcore.io.DiskLruCache\n1\n100\n2\n\nDIRTY k1\nCLEAN k1 3 2\n"
    );
    Ok(())
}

#[test]
fn abort_drops_entry() -> Result<(), Error> {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path(), 100, 2, ANY_SIZE)?;

    let mut editor = cache.edit("k1")?.unwrap();
    editor.set(0, "AB")?;
    editor.set(1, "C")?;
    editor.abort()?;
    cache.close()?;

    let journal = fs::read_to_string(dir.path().join("journal")).unwrap();
    assert_eq!(
        journal,
        "libcore.io.DiskLruCache\n1\n100\n2\n\nDIRTY k1\nREMOVE k1\n"
    );
    for name in ["k1.0", "k1.1", "k1.0.tmp", "k1.1.tmp"] {
        assert!(!dir.path().join(name).exists(), "{} should be absent", name);
    }
    Ok(())
}

#[test]
fn lru_across_sessions() -> Result<(), Error> {
    let dir = tempdir().unwrap();
    {
        let cache = Cache::open(dir.path(), 100, 2, 10)?;
        for key in ["a", "b", "c", "d", "e", "f"] {
            let mut editor = cache.edit(key)?.unwrap();
            editor.set(0, "1")?;
            editor.set(1, "1")?;
            editor.commit()?;
        }
        // Inserting "f" pushed total size to 12; flush forces the pending
        // eviction of the least-recently-used "a" to bring it back to budget.
        cache.flush()?;
        assert_eq!(cache.size(), 10);
        assert!(cache.get("a")?.is_none());

        // Promote "b" to most-recently-used.
        cache.get("b")?.unwrap();
        cache.close()?;
    }

    {
        let cache = Cache::open(dir.path(), 100, 2, 10)?;
        let mut editor = cache.edit("g")?.unwrap();
        editor.set(0, "1")?;
        editor.set(1, "1")?;
        editor.commit()?;
        cache.flush()?;

        assert!(cache.get("a")?.is_none());
        assert!(cache.get("c")?.is_none());
        assert!(cache.get("b")?.is_some());
        assert!(cache.get("d")?.is_some());
        assert!(cache.get("e")?.is_some());
        assert!(cache.get("f")?.is_some());
        assert!(cache.get("g")?.is_some());
        assert_eq!(cache.size(), 10);
    }
    Ok(())
}

#[test]
fn recovery_promotes_backup() -> Result<(), Error> {
    let dir = tempdir().unwrap();
    {
        let cache = Cache::open(dir.path(), 100, 2, ANY_SIZE)?;
        let mut editor = cache.edit("k1")?.unwrap();
        editor.set(0, "A")?;
        editor.set(1, "B")?;
        editor.commit()?;
        cache.close()?;
    }

    fs::rename(dir.path().join("journal"), dir.path().join("journal.bkp")).unwrap();
    assert!(!dir.path().join("journal").exists());

    let cache = Cache::open(dir.path(), 100, 2, ANY_SIZE)?;
    assert!(!dir.path().join("journal.bkp").exists());
    assert!(dir.path().join("journal").exists());
    let mut snapshot = cache.get("k1")?.unwrap();
    assert_eq!(snapshot.string(0)?, "A");
    Ok(())
}

#[test]
fn eviction_on_insert() -> Result<(), Error> {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path(), 100, 2, 10)?;

    let mut a = cache.edit("a")?.unwrap();
    a.set(0, "a")?;
    a.set(1, "aaa")?;
    a.commit()?;

    let mut b = cache.edit("b")?.unwrap();
    b.set(0, "bb")?;
    b.set(1, "bbbb")?;
    b.commit()?;

    let mut c = cache.edit("c")?.unwrap();
    c.set(0, "c")?;
    c.set(1, "c")?;
    c.commit()?;

    cache.flush()?;
    assert_eq!(cache.size(), 8);
    assert!(cache.get("a")?.is_none());
    assert!(cache.get("b")?.is_some());
    assert!(cache.get("c")?.is_some());
    Ok(())
}

#[test]
fn editor_idempotence_on_absent_value() -> Result<(), Error> {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path(), 100, 2, ANY_SIZE)?;

    // Establish a fully readable entry first.
    let mut editor = cache.edit("k1")?.unwrap();
    editor.set(0, "A")?;
    editor.set(1, "B")?;
    editor.commit()?;

    // Partial update: only index 0 rewritten.
    let mut editor = cache.edit("k1")?.unwrap();
    editor.set(0, "C")?;
    editor.commit()?;

    let mut snapshot = cache.get("k1")?.unwrap();
    assert_eq!(snapshot.string(0)?, "C");
    assert_eq!(snapshot.string(1)?, "B");
    Ok(())
}

#[test]
fn first_publish_requires_every_value() -> Result<(), Error> {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path(), 100, 2, ANY_SIZE)?;

    let mut editor = cache.edit("k1")?.unwrap();
    editor.set(0, "A")?;
    let err = editor.commit().unwrap_err();
    assert!(matches!(err, Error::IllegalState(ref m) if m.contains("index 1")));

    assert!(cache.get("k1")?.is_none());
    Ok(())
}

#[test]
fn edit_refuses_concurrent_editors() -> Result<(), Error> {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path(), 100, 2, ANY_SIZE)?;

    let _first = cache.edit("k1")?.unwrap();
    assert!(cache.edit("k1")?.is_none());
    Ok(())
}

#[test]
fn snapshot_edit_rejects_stale_sequence() -> Result<(), Error> {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path(), 100, 2, ANY_SIZE)?;

    let mut editor = cache.edit("k1")?.unwrap();
    editor.set(0, "A")?;
    editor.set(1, "B")?;
    editor.commit()?;

    let snapshot = cache.get("k1")?.unwrap();

    let mut other = cache.edit("k1")?.unwrap();
    other.set(0, "C")?;
    other.set(1, "D")?;
    other.commit()?;

    assert!(snapshot.edit()?.is_none());
    Ok(())
}

#[test]
fn key_validation_boundaries() {
    for bad in ["", "has space", "has/slash", "has\nnewline", &"x".repeat(65)] {
        assert!(matches!(
            disklru_key_validate(bad),
            Err(Error::IllegalArgument(_))
        ));
    }
    assert!(disklru_key_validate("valid-key_123").is_ok());
}

fn disklru_key_validate(key: &str) -> Result<(), Error> {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path(), 100, 1, ANY_SIZE).unwrap();
    cache.get(key).map(|_| ())
}

#[test]
fn oversized_entry_is_evicted_immediately_after_commit() -> Result<(), Error> {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path(), 100, 1, 4)?;

    let mut editor = cache.edit("big")?.unwrap();
    editor.set(0, "way too big for the budget")?;
    editor.commit()?;

    cache.flush()?;
    assert!(cache.get("big")?.is_none());
    Ok(())
}

#[test]
fn concurrent_edits_of_same_key_at_most_one_succeeds() -> Result<(), Error> {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path(), 100, 1, ANY_SIZE)?;

    const THREAD_COUNT: usize = 16;
    let wg = WaitGroup::new();
    let successes = std::sync::Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREAD_COUNT)
        .map(|_| {
            let cache = cache.clone();
            let successes = successes.clone();
            let wg = wg.clone();
            std::thread::spawn(move || {
                if let Ok(Some(mut editor)) = cache.edit("contested") {
                    successes.fetch_add(1, Ordering::SeqCst);
                    let _ = editor.set(0, "value");
                    let _ = editor.commit();
                }
                drop(wg);
            })
        })
        .collect();

    wg.wait();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert!(cache.get("contested")?.is_some());
    Ok(())
}

#[test]
fn closed_cache_rejects_further_operations() -> Result<(), Error> {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path(), 100, 1, ANY_SIZE)?;
    cache.close()?;
    assert!(matches!(cache.get("k1"), Err(Error::IllegalState(_))));
    // Closing twice is a no-op.
    cache.close()?;
    Ok(())
}
