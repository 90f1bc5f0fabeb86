//! Integration tests for the time-series database.

use bytes::{Bytes, BytesMut};
use metabasenet_core::codec::Codec;
use metabasenet_core::ctsdb::{CtsConfig, CtsDb, WalkControl};
use metabasenet_core::{MetabaseError, Result, Uint224, Uint256};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

/// Where a block's serialized form lives, keyed by its digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockLocation {
    hash: Uint224,
    file: u32,
    offset: u32,
    blocktime: u32,
}

impl Codec for BlockLocation {
    fn encode(&self, buf: &mut BytesMut) {
        self.hash.encode(buf);
        self.file.encode(buf);
        self.offset.encode(buf);
        self.blocktime.encode(buf);
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            hash: Uint224::decode(buf)?,
            file: u32::decode(buf)?,
            offset: u32::decode(buf)?,
            blocktime: u32::decode(buf)?,
        })
    }
}

fn random_hash(rng: &mut StdRng) -> Uint224 {
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes[..]);
    Uint224::from(Uint256(bytes))
}

fn open(dir: &TempDir) -> CtsDb<Uint224, BlockLocation> {
    let db = CtsDb::new();
    db.initialize(dir.path(), CtsConfig::default()).unwrap();
    db
}

#[test]
fn test_bulk_write_flush_retrieve() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let mut rng = StdRng::seed_from_u64(0xC75D);

    let mut samples = Vec::new();
    for t in 0..3600u64 {
        for j in 0..10u32 {
            let hash = random_hash(&mut rng);
            let record = BlockLocation {
                hash,
                file: 1,
                offset: t as u32 * j,
                blocktime: t as u32,
            };
            db.update(t, hash, record).unwrap();
            if j == 0 {
                samples.push((t, hash, record));
            }
        }
    }

    db.flush().unwrap();
    // A second flush with an empty buffer is a no-op
    db.flush().unwrap();

    for (t, hash, record) in &samples {
        let found = db.retrieve(*t, hash).unwrap().unwrap();
        assert_eq!(found, *record);
        assert_eq!(found.hash, *hash);
    }

    db.deinitialize().unwrap();
}

#[test]
fn test_walk_visits_deduplicated_set_in_order() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let mut rng = StdRng::seed_from_u64(7);

    // Random writes across three buckets, some keys written twice; the
    // second write must win.
    let mut expected: std::collections::BTreeMap<(u64, Uint224), u32> =
        std::collections::BTreeMap::new();
    let mut keys = Vec::new();
    for i in 0..5_000u32 {
        let t = rng.gen_range(0..3 * 3600u64);
        let hash = if i % 7 == 0 && !keys.is_empty() {
            let (old_t, old_hash): (u64, Uint224) = keys[rng.gen_range(0..keys.len())];
            // rewrite an earlier key in its own bucket
            let record = BlockLocation {
                hash: old_hash,
                file: 2,
                offset: i,
                blocktime: old_t as u32,
            };
            db.update(old_t, old_hash, record).unwrap();
            expected.insert((old_t / 3600, old_hash), i);
            continue;
        } else {
            random_hash(&mut rng)
        };
        let record = BlockLocation {
            hash,
            file: 2,
            offset: i,
            blocktime: t as u32,
        };
        db.update(t, hash, record).unwrap();
        expected.insert((t / 3600, hash), i);
        keys.push((t, hash));
    }

    db.flush().unwrap();

    let mut visited = Vec::new();
    db.walk_through(0, 3 * 3600 - 1, &mut |k, r: &BlockLocation| {
        visited.push((r.blocktime as u64 / 3600, *k, r.offset));
        WalkControl::Continue
    })
    .unwrap();

    assert_eq!(visited.len(), expected.len());
    for window in visited.windows(2) {
        let a = (window[0].0, window[0].1);
        let b = (window[1].0, window[1].1);
        assert!(a < b, "walk must ascend by (bucket, key)");
    }
    for (bucket, key, offset) in &visited {
        assert_eq!(expected.get(&(*bucket, *key)), Some(offset));
    }
}

#[test]
fn test_reopen_sees_flushed_data() {
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(99);
    let hash = random_hash(&mut rng);
    let record = BlockLocation {
        hash,
        file: 3,
        offset: 123,
        blocktime: 100,
    };

    {
        let db = open(&dir);
        db.update(100, hash, record).unwrap();
        db.flush().unwrap();
        db.deinitialize().unwrap();
    }

    let db = open(&dir);
    assert_eq!(db.retrieve(100, &hash).unwrap(), Some(record));

    // Overwrite, flush, reopen again
    let rewritten = BlockLocation {
        offset: 456,
        ..record
    };
    db.update(100, hash, rewritten).unwrap();
    db.flush().unwrap();
    db.deinitialize().unwrap();

    let db = open(&dir);
    assert_eq!(db.retrieve(100, &hash).unwrap(), Some(rewritten));
}

#[test]
fn test_interrupted_flush_recovery() {
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let hash = random_hash(&mut rng);
    let record = BlockLocation {
        hash,
        file: 1,
        offset: 7,
        blocktime: 0,
    };

    {
        let db = open(&dir);
        db.update(5 * 3600, hash, record).unwrap();
        db.flush().unwrap();
        db.deinitialize().unwrap();
    }

    // A crash mid-flush leaves a temp file next to the authoritative chunk
    std::fs::write(dir.path().join("bucket-5.tmp"), b"interrupted").unwrap();

    let db = open(&dir);
    assert!(!dir.path().join("bucket-5.tmp").exists());
    assert!(dir.path().join("bucket-5.chk").exists());
    assert_eq!(db.retrieve(5 * 3600, &hash).unwrap(), Some(record));
}

#[test]
fn test_remove_all_then_repopulate() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let mut rng = StdRng::seed_from_u64(21);

    let mut hashes = Vec::new();
    for t in (0..10u64).map(|n| n * 3600) {
        let hash = random_hash(&mut rng);
        db.update(
            t,
            hash,
            BlockLocation {
                hash,
                file: 0,
                offset: 0,
                blocktime: t as u32,
            },
        )
        .unwrap();
        hashes.push((t, hash));
    }
    db.flush().unwrap();

    db.remove_all().unwrap();
    for (t, hash) in &hashes {
        assert_eq!(db.retrieve(*t, hash).unwrap(), None);
    }

    // The database stays usable after a purge
    let (t, hash) = hashes[0];
    let record = BlockLocation {
        hash,
        file: 9,
        offset: 9,
        blocktime: t as u32,
    };
    db.update(t, hash, record).unwrap();
    db.flush().unwrap();
    assert_eq!(db.retrieve(t, &hash).unwrap(), Some(record));
}

#[test]
fn test_second_process_lock_contention() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);

    let second: CtsDb<Uint224, BlockLocation> = CtsDb::new();
    let err = second
        .initialize(dir.path(), CtsConfig::default())
        .unwrap_err();
    assert!(matches!(err, MetabaseError::LockContended(_)));

    db.deinitialize().unwrap();
    second.initialize(dir.path(), CtsConfig::default()).unwrap();
}
