//! CTSDB - content-addressed time-series storage
//!
//! Maps `(timestamp, key)` to records. Time is partitioned into fixed-width
//! buckets; each non-empty bucket materializes as one immutable chunk file,
//! fronted by an in-memory write buffer that `flush` drains. Within a
//! bucket the buffered view shadows the on-disk view, and the last write
//! for a key wins.

pub mod chunk;
pub mod lock;

pub use chunk::{ChunkStore, IndexEntry, WalkControl, CHUNK_MAGIC, CHUNK_VERSION};
pub use lock::DirLock;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::codec::Codec;
use crate::types::{BucketId, ChunkKey, Timestamp};
use crate::{MetabaseError, Result};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct CtsConfig {
    /// Width of a time bucket in seconds; must be positive
    pub bucket_width: u64,
    /// Compress chunk payloads
    pub compress: bool,
}

impl Default for CtsConfig {
    fn default() -> Self {
        Self {
            bucket_width: crate::config::BUCKET_WIDTH_SECONDS,
            compress: true,
        }
    }
}

struct DbState<K, R> {
    store: ChunkStore<K, R>,
    buffer: BTreeMap<BucketId, BTreeMap<K, R>>,
    on_disk: BTreeSet<BucketId>,
    bucket_width: u64,
    _lock: DirLock,
}

/// A time-bucketed map of chunks plus an in-memory write buffer.
///
/// `update` and `flush` serialize on the write guard; `retrieve` and
/// `walk_through` share the read guard and see buffer changes only at
/// `update` boundaries. Chunk replacement is atomic via tmp-file rename.
pub struct CtsDb<K: ChunkKey, R: Codec + Clone> {
    state: RwLock<Option<DbState<K, R>>>,
}

impl<K: ChunkKey, R: Codec + Clone> Default for CtsDb<K, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ChunkKey, R: Codec + Clone> CtsDb<K, R> {
    /// Create a closed database handle
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }

    /// Open the database: create the directory if missing, take the
    /// exclusive directory lock, sweep stale temp files and index the
    /// chunks already on disk.
    pub fn initialize(&self, path: &Path, config: CtsConfig) -> Result<()> {
        if config.bucket_width == 0 {
            return Err(MetabaseError::Config(
                "bucket width must be positive".into(),
            ));
        }

        let mut guard = self.state.write();
        if guard.is_some() {
            return Err(MetabaseError::AlreadyOpen);
        }

        std::fs::create_dir_all(path)?;
        let dir_lock = DirLock::acquire(path)?;
        let store = ChunkStore::new(path, config.compress);
        let on_disk = store.scan_buckets()?;

        info!(
            path = %path.display(),
            buckets = on_disk.len(),
            bucket_width = config.bucket_width,
            "opened time-series database"
        );

        *guard = Some(DbState {
            store,
            buffer: BTreeMap::new(),
            on_disk,
            bucket_width: config.bucket_width,
            _lock: dir_lock,
        });
        Ok(())
    }

    /// Close the database and release the directory lock.
    ///
    /// Buffered records that were never flushed are discarded.
    pub fn deinitialize(&self) -> Result<()> {
        let mut guard = self.state.write();
        let state = guard.take().ok_or(MetabaseError::NotOpen)?;
        if !state.buffer.is_empty() {
            warn!(
                buckets = state.buffer.len(),
                "closing database with unflushed buckets; buffered records discarded"
            );
        }
        Ok(())
    }

    /// Whether the database is open
    pub fn is_open(&self) -> bool {
        self.state.read().is_some()
    }

    /// Buffer a record under the bucket of `ts`. The last write for a
    /// key within a bucket wins.
    pub fn update(&self, ts: Timestamp, key: K, record: R) -> Result<()> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(MetabaseError::NotOpen)?;
        let bucket = ts / state.bucket_width;
        state.buffer.entry(bucket).or_default().insert(key, record);
        Ok(())
    }

    /// Look up the record for `(bucket(ts), key)`, preferring the buffer
    /// over the chunk on disk.
    pub fn retrieve(&self, ts: Timestamp, key: &K) -> Result<Option<R>> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(MetabaseError::NotOpen)?;
        let bucket = ts / state.bucket_width;

        if let Some(buffered) = state.buffer.get(&bucket) {
            if let Some(record) = buffered.get(key) {
                return Ok(Some(record.clone()));
            }
        }
        if state.on_disk.contains(&bucket) {
            return state.store.read_record(bucket, key);
        }
        Ok(None)
    }

    /// Visit every record in `[bucket(t_lo), bucket(t_hi)]` in ascending
    /// `(bucket, key)` order, buffered values overriding on-disk values
    /// for the same key. The visitor may stop the walk.
    pub fn walk_through(
        &self,
        t_lo: Timestamp,
        t_hi: Timestamp,
        visitor: &mut dyn FnMut(&K, &R) -> WalkControl,
    ) -> Result<()> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(MetabaseError::NotOpen)?;
        let lo = t_lo / state.bucket_width;
        let hi = t_hi / state.bucket_width;

        let mut buckets: BTreeSet<BucketId> = state.on_disk.range(lo..=hi).copied().collect();
        buckets.extend(state.buffer.range(lo..=hi).map(|(b, _)| *b));

        for bucket in buckets {
            let disk = if state.on_disk.contains(&bucket) {
                match state.store.read_chunk(bucket) {
                    Ok(Some(records)) => records,
                    Ok(None) => Vec::new(),
                    Err(e) if e.is_corruption() => {
                        warn!(bucket, error = %e, "skipping corrupted chunk during walk");
                        Vec::new()
                    }
                    Err(e) => return Err(e),
                }
            } else {
                Vec::new()
            };

            let empty = BTreeMap::new();
            let buffered = state.buffer.get(&bucket).unwrap_or(&empty);

            let mut disk_iter = disk.iter().map(|(k, r)| (k, r)).peekable();
            let mut buf_iter = buffered.iter().peekable();
            loop {
                let control = match (disk_iter.peek(), buf_iter.peek()) {
                    (None, None) => break,
                    (Some(&(dk, dv)), None) => {
                        let c = visitor(dk, dv);
                        disk_iter.next();
                        c
                    }
                    (None, Some(&(bk, bv))) => {
                        let c = visitor(bk, bv);
                        buf_iter.next();
                        c
                    }
                    (Some(&(dk, dv)), Some(&(bk, bv))) => match dk.cmp(bk) {
                        std::cmp::Ordering::Less => {
                            let c = visitor(dk, dv);
                            disk_iter.next();
                            c
                        }
                        std::cmp::Ordering::Greater => {
                            let c = visitor(bk, bv);
                            buf_iter.next();
                            c
                        }
                        std::cmp::Ordering::Equal => {
                            // buffered value shadows the on-disk one
                            let c = visitor(bk, bv);
                            disk_iter.next();
                            buf_iter.next();
                            c
                        }
                    },
                };
                if control.is_stop() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Materialize every buffered bucket into a new immutable chunk, in
    /// ascending bucket order.
    ///
    /// A failure on a bucket leaves earlier buckets flushed and that
    /// bucket plus later ones buffered, surfaced as `FlushFailed`.
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(MetabaseError::NotOpen)?;

        let buckets: Vec<BucketId> = state.buffer.keys().copied().collect();
        for bucket in buckets {
            let result = Self::flush_bucket(state, bucket);
            if let Err(e) = result {
                return Err(MetabaseError::FlushFailed {
                    bucket,
                    source: Box::new(e),
                });
            }
            state.buffer.remove(&bucket);
            state.on_disk.insert(bucket);
        }
        Ok(())
    }

    fn flush_bucket(state: &mut DbState<K, R>, bucket: BucketId) -> Result<()> {
        let mut merged: BTreeMap<K, R> = if state.on_disk.contains(&bucket) {
            state
                .store
                .read_chunk(bucket)?
                .unwrap_or_default()
                .into_iter()
                .collect()
        } else {
            BTreeMap::new()
        };
        if let Some(buffered) = state.buffer.get(&bucket) {
            for (key, record) in buffered {
                merged.insert(*key, record.clone());
            }
        }
        state.store.write_chunk(bucket, merged)
    }

    /// Drop every chunk on disk and clear the write buffer.
    pub fn remove_all(&self) -> Result<()> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(MetabaseError::NotOpen)?;

        for bucket in state.on_disk.iter().copied().collect::<Vec<_>>() {
            state.store.delete_chunk(bucket)?;
        }
        let removed = state.on_disk.len();
        state.on_disk.clear();
        state.buffer.clear();
        info!(chunks = removed, "removed all chunks");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Uint224;
    use tempfile::TempDir;

    fn key(n: u8) -> Uint224 {
        let mut bytes = [0u8; 28];
        bytes[27] = n;
        Uint224(bytes)
    }

    fn open(dir: &TempDir) -> CtsDb<Uint224, u64> {
        let db = CtsDb::new();
        db.initialize(dir.path(), CtsConfig::default()).unwrap();
        db
    }

    #[test]
    fn test_state_machine() {
        let dir = TempDir::new().unwrap();
        let db: CtsDb<Uint224, u64> = CtsDb::new();

        assert!(matches!(db.update(0, key(1), 1), Err(MetabaseError::NotOpen)));
        assert!(matches!(db.retrieve(0, &key(1)), Err(MetabaseError::NotOpen)));
        assert!(matches!(db.flush(), Err(MetabaseError::NotOpen)));
        assert!(matches!(db.deinitialize(), Err(MetabaseError::NotOpen)));

        db.initialize(dir.path(), CtsConfig::default()).unwrap();
        assert!(db.is_open());
        assert!(matches!(
            db.initialize(dir.path(), CtsConfig::default()),
            Err(MetabaseError::AlreadyOpen)
        ));

        db.deinitialize().unwrap();
        assert!(!db.is_open());
    }

    #[test]
    fn test_zero_bucket_width_rejected() {
        let dir = TempDir::new().unwrap();
        let db: CtsDb<Uint224, u64> = CtsDb::new();
        let config = CtsConfig {
            bucket_width: 0,
            compress: true,
        };
        assert!(matches!(
            db.initialize(dir.path(), config),
            Err(MetabaseError::Config(_))
        ));
    }

    #[test]
    fn test_read_your_writes() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.update(100, key(1), 42).unwrap();
        assert_eq!(db.retrieve(100, &key(1)).unwrap(), Some(42));

        db.flush().unwrap();
        assert_eq!(db.retrieve(100, &key(1)).unwrap(), Some(42));
    }

    #[test]
    fn test_same_key_different_buckets() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        // One entry at t=0 and one at t=3600 land in adjacent buckets
        db.update(0, key(1), 1).unwrap();
        db.update(3600, key(1), 2).unwrap();
        db.flush().unwrap();

        assert_eq!(db.retrieve(0, &key(1)).unwrap(), Some(1));
        assert_eq!(db.retrieve(3600, &key(1)).unwrap(), Some(2));
        assert!(dir.path().join("bucket-0.chk").exists());
        assert!(dir.path().join("bucket-1.chk").exists());
    }

    #[test]
    fn test_last_write_wins_across_flush() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.update(100, key(1), 1).unwrap();
        db.flush().unwrap();
        db.update(100, key(1), 2).unwrap();

        // Buffer shadows the chunk
        assert_eq!(db.retrieve(100, &key(1)).unwrap(), Some(2));

        // And the rewrite persists across reopen
        db.flush().unwrap();
        db.deinitialize().unwrap();
        let db = open(&dir);
        assert_eq!(db.retrieve(100, &key(1)).unwrap(), Some(2));
    }

    #[test]
    fn test_flush_idempotence() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        for n in 0..20u8 {
            db.update(n as u64, key(n), n as u64).unwrap();
        }
        db.flush().unwrap();
        let before = std::fs::read(dir.path().join("bucket-0.chk")).unwrap();

        db.flush().unwrap();
        let after = std::fs::read(dir.path().join("bucket-0.chk")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_walk_merges_buffer_over_disk_in_order() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.update(10, key(2), 20).unwrap();
        db.update(10, key(4), 40).unwrap();
        db.flush().unwrap();

        // Buffered: override key 2, add keys 1 and 3
        db.update(10, key(2), 99).unwrap();
        db.update(10, key(1), 10).unwrap();
        db.update(10, key(3), 30).unwrap();

        let mut seen = Vec::new();
        db.walk_through(0, 3599, &mut |k, v| {
            seen.push((*k, *v));
            WalkControl::Continue
        })
        .unwrap();

        assert_eq!(
            seen,
            vec![(key(1), 10), (key(2), 99), (key(3), 30), (key(4), 40)]
        );
    }

    #[test]
    fn test_walk_spans_buckets_and_stops() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.update(0, key(5), 5).unwrap();
        db.update(3600, key(1), 1).unwrap();
        db.update(7200, key(9), 9).unwrap();
        db.flush().unwrap();

        let mut seen = Vec::new();
        db.walk_through(0, 7200, &mut |k, v| {
            seen.push((*k, *v));
            WalkControl::Continue
        })
        .unwrap();
        // Ascending bucket order, not key order across buckets
        assert_eq!(seen, vec![(key(5), 5), (key(1), 1), (key(9), 9)]);

        let mut count = 0;
        db.walk_through(0, 7200, &mut |_, _| {
            count += 1;
            WalkControl::Stop
        })
        .unwrap();
        assert_eq!(count, 1);

        // Range excludes the last bucket
        let mut seen = Vec::new();
        db.walk_through(0, 3600, &mut |k, _| {
            seen.push(*k);
            WalkControl::Continue
        })
        .unwrap();
        assert_eq!(seen, vec![key(5), key(1)]);
    }

    #[test]
    fn test_remove_all() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.update(0, key(1), 1).unwrap();
        db.update(7200, key(2), 2).unwrap();
        db.flush().unwrap();
        db.update(3600, key(3), 3).unwrap();

        db.remove_all().unwrap();

        assert_eq!(db.retrieve(0, &key(1)).unwrap(), None);
        assert_eq!(db.retrieve(3600, &key(3)).unwrap(), None);
        assert_eq!(db.retrieve(7200, &key(2)).unwrap(), None);
        let chunks: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "chk"))
            .collect();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_stale_tmp_removed_and_chunk_kept() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.update(5 * 3600, key(1), 1).unwrap();
        db.flush().unwrap();
        db.deinitialize().unwrap();

        // Simulate a crash between tmp creation and rename
        std::fs::write(dir.path().join("bucket-5.tmp"), b"torn write").unwrap();

        let db = open(&dir);
        assert!(!dir.path().join("bucket-5.tmp").exists());
        // The prior chunk remains authoritative
        assert_eq!(db.retrieve(5 * 3600, &key(1)).unwrap(), Some(1));
    }

    #[test]
    fn test_deinitialize_discards_unflushed() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.update(0, key(1), 1).unwrap();
        db.deinitialize().unwrap();

        let db = open(&dir);
        assert_eq!(db.retrieve(0, &key(1)).unwrap(), None);
    }
}
