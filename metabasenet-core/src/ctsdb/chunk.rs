//! Immutable on-disk chunk files
//!
//! One chunk holds every record of one time bucket, laid out as:
//!
//! | field          | width | meaning                                   |
//! |----------------|-------|-------------------------------------------|
//! | magic          | 4 B   | `CTSK`                                    |
//! | version        | 2 B   | `1`                                       |
//! | flags          | 2 B   | bit 0: payload compressed                 |
//! | bucket_id      | 8 B   | unsigned little-endian                    |
//! | count          | 4 B   | number of entries                         |
//! | index          | count × (key + 4 + 4) | `(key, offset, length)` sorted by key |
//! | payload_length | 4 B   | bytes that follow                         |
//! | payload        | var   | concatenated records, compressed as a whole if flagged |
//! | crc32          | 4 B   | over all preceding bytes                  |
//!
//! Offsets address the uncompressed payload. Writes go to a `.tmp` file,
//! fsync, then rename, so readers only ever observe complete chunks.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{compress, uncompress, Codec};
use crate::types::{BucketId, ChunkKey};
use crate::{MetabaseError, Result};

/// Chunk file magic number
pub const CHUNK_MAGIC: [u8; 4] = *b"CTSK";

/// Supported chunk format version
pub const CHUNK_VERSION: u16 = 1;

const FLAG_COMPRESSED: u16 = 0x0001;
const HEADER_LEN: usize = 4 + 2 + 2 + 8 + 4;
const CRC_LEN: usize = 4;

/// Visitor verdict during an in-order walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    /// Keep visiting
    Continue,
    /// Terminate the walk early
    Stop,
}

impl WalkControl {
    /// Whether the visitor requested termination
    pub fn is_stop(self) -> bool {
        matches!(self, WalkControl::Stop)
    }
}

/// One directory entry: key plus the record's slice of the payload
#[derive(Debug, Clone)]
pub struct IndexEntry<K> {
    pub key: K,
    pub offset: u32,
    pub length: u32,
}

struct ChunkHeader {
    flags: u16,
    count: u32,
}

/// On-disk chunk files for one database directory
pub struct ChunkStore<K, R> {
    dir: PathBuf,
    compress: bool,
    _marker: PhantomData<fn() -> (K, R)>,
}

impl<K: ChunkKey, R: Codec> ChunkStore<K, R> {
    pub fn new(dir: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            dir: dir.into(),
            compress,
            _marker: PhantomData,
        }
    }

    /// Directory this store writes into
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn chunk_path(&self, bucket: BucketId) -> PathBuf {
        self.dir.join(format!("bucket-{}.chk", bucket))
    }

    fn tmp_path(&self, bucket: BucketId) -> PathBuf {
        self.dir.join(format!("bucket-{}.tmp", bucket))
    }

    /// Write a bucket's records as a new immutable chunk.
    ///
    /// Entries need not be sorted; duplicate keys keep the last occurrence.
    /// Any prior chunk for the bucket is replaced atomically.
    pub fn write_chunk(
        &self,
        bucket: BucketId,
        entries: impl IntoIterator<Item = (K, R)>,
    ) -> Result<()> {
        let mut sorted: BTreeMap<K, R> = BTreeMap::new();
        for (key, record) in entries {
            sorted.insert(key, record);
        }

        let mut payload = BytesMut::new();
        let mut index = Vec::with_capacity(sorted.len());
        for (key, record) in &sorted {
            let offset = payload.len();
            record.encode(&mut payload);
            let length = payload.len() - offset;
            if length > u32::MAX as usize {
                return Err(MetabaseError::RecordTooLarge {
                    size: length as u64,
                });
            }
            if payload.len() > u32::MAX as usize {
                return Err(MetabaseError::RecordTooLarge {
                    size: payload.len() as u64,
                });
            }
            index.push(IndexEntry {
                key: *key,
                offset: offset as u32,
                length: length as u32,
            });
        }

        let payload_bytes = if self.compress {
            compress(&payload)
        } else {
            payload.to_vec()
        };
        if payload_bytes.len() > u32::MAX as usize {
            return Err(MetabaseError::RecordTooLarge {
                size: payload_bytes.len() as u64,
            });
        }

        let mut buf = BytesMut::with_capacity(
            HEADER_LEN + index.len() * (K::WIDTH + 8) + 4 + payload_bytes.len() + CRC_LEN,
        );
        buf.put_slice(&CHUNK_MAGIC);
        buf.put_u16_le(CHUNK_VERSION);
        buf.put_u16_le(if self.compress { FLAG_COMPRESSED } else { 0 });
        buf.put_u64_le(bucket);
        buf.put_u32_le(index.len() as u32);
        for entry in &index {
            entry.key.encode(&mut buf);
            buf.put_u32_le(entry.offset);
            buf.put_u32_le(entry.length);
        }
        buf.put_u32_le(payload_bytes.len() as u32);
        buf.put_slice(&payload_bytes);
        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);

        let tmp = self.tmp_path(bucket);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.chunk_path(bucket))?;
        Ok(())
    }

    /// Read a chunk's directory. Returns `None` when no chunk exists.
    pub fn read_chunk_index(&self, bucket: BucketId) -> Result<Option<Vec<IndexEntry<K>>>> {
        let mut file = match File::open(self.chunk_path(bucket)) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (_, index) = Self::read_header_index(&mut file, bucket)?;
        Ok(Some(index))
    }

    /// Look up a single record by key, verifying the chunk checksum.
    /// Returns `None` when the chunk or the key is absent.
    pub fn read_record(&self, bucket: BucketId, key: &K) -> Result<Option<R>> {
        let (index, payload) = match self.load_verified(bucket)? {
            Some(parts) => parts,
            None => return Ok(None),
        };

        let entry = match index.binary_search_by(|e| e.key.cmp(key)) {
            Ok(pos) => &index[pos],
            Err(_) => return Ok(None),
        };

        let raw = Self::slice_record(&payload, entry)?;
        let mut bytes = Bytes::from(raw);
        let record = R::decode(&mut bytes)
            .map_err(|e| MetabaseError::CorruptedChunk(format!("bucket {}: {}", bucket, e)))?;
        Ok(Some(record))
    }

    /// Load every record of a chunk in key order, verifying the checksum.
    /// Returns `None` when no chunk exists for the bucket.
    pub fn read_chunk(&self, bucket: BucketId) -> Result<Option<Vec<(K, R)>>> {
        let (index, payload) = match self.load_verified(bucket)? {
            Some(parts) => parts,
            None => return Ok(None),
        };

        let mut records = Vec::with_capacity(index.len());
        for entry in &index {
            let raw = Self::slice_record(&payload, entry)?;
            let mut bytes = Bytes::from(raw);
            let record = R::decode(&mut bytes)
                .map_err(|e| MetabaseError::CorruptedChunk(format!("bucket {}: {}", bucket, e)))?;
            records.push((entry.key, record));
        }
        Ok(Some(records))
    }

    /// Read a chunk file whole, check magic, version and the trailing
    /// CRC-32, and return the directory plus the uncompressed payload.
    /// Every record-returning read goes through here.
    fn load_verified(&self, bucket: BucketId) -> Result<Option<(Vec<IndexEntry<K>>, Vec<u8>)>> {
        let data = match fs::read(self.chunk_path(bucket)) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if data.len() < HEADER_LEN + 4 + CRC_LEN {
            return Err(MetabaseError::CorruptedChunk(format!(
                "bucket {}: file truncated at {} bytes",
                bucket,
                data.len()
            )));
        }

        let body_len = data.len() - CRC_LEN;
        let expected = u32::from_le_bytes(data[body_len..].try_into().expect("crc width"));
        let actual = crc32fast::hash(&data[..body_len]);
        if expected != actual {
            return Err(MetabaseError::ChecksumMismatch { expected, actual });
        }

        let mut buf = Bytes::copy_from_slice(&data[..body_len]);
        let header = Self::parse_header(&mut buf, bucket)?;
        let index = Self::parse_index(&mut buf, header.count, bucket)?;

        if buf.remaining() < 4 {
            return Err(MetabaseError::CorruptedChunk(format!(
                "bucket {}: missing payload length",
                bucket
            )));
        }
        let payload_len = buf.get_u32_le() as usize;
        if buf.remaining() != payload_len {
            return Err(MetabaseError::CorruptedChunk(format!(
                "bucket {}: payload length {} does not match {} remaining bytes",
                bucket,
                payload_len,
                buf.remaining()
            )));
        }

        let payload = if header.flags & FLAG_COMPRESSED != 0 {
            uncompress(&buf)?
        } else {
            buf.to_vec()
        };
        Ok(Some((index, payload)))
    }

    /// Visit a chunk's records in key order. The visitor may stop early.
    /// Returns `Continue` when the chunk is absent or fully visited.
    pub fn walk_chunk(
        &self,
        bucket: BucketId,
        visitor: &mut dyn FnMut(&K, &R) -> WalkControl,
    ) -> Result<WalkControl> {
        let records = match self.read_chunk(bucket)? {
            Some(records) => records,
            None => return Ok(WalkControl::Continue),
        };
        for (key, record) in &records {
            if visitor(key, record).is_stop() {
                return Ok(WalkControl::Stop);
            }
        }
        Ok(WalkControl::Continue)
    }

    /// Remove a chunk file; absent files are fine.
    pub fn delete_chunk(&self, bucket: BucketId) -> Result<()> {
        match fs::remove_file(self.chunk_path(bucket)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate buckets with a chunk on disk, deleting stale `.tmp`
    /// files left by an interrupted write.
    pub fn scan_buckets(&self) -> Result<std::collections::BTreeSet<BucketId>> {
        let mut buckets = std::collections::BTreeSet::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if let Some(id) = name.strip_prefix("bucket-").and_then(|s| s.strip_suffix(".tmp")) {
                if id.parse::<BucketId>().is_ok() {
                    tracing::warn!(file = %path.display(), "removing stale chunk temp file");
                    fs::remove_file(&path)?;
                }
            } else if let Some(id) =
                name.strip_prefix("bucket-").and_then(|s| s.strip_suffix(".chk"))
            {
                if let Ok(id) = id.parse::<BucketId>() {
                    buckets.insert(id);
                }
            }
        }
        Ok(buckets)
    }

    fn read_header_index(file: &mut File, bucket: BucketId) -> Result<(ChunkHeader, Vec<IndexEntry<K>>)> {
        let mut header_bytes = [0u8; HEADER_LEN];
        file.read_exact(&mut header_bytes).map_err(|_| {
            MetabaseError::CorruptedChunk(format!("bucket {}: header truncated", bucket))
        })?;
        let mut buf = Bytes::copy_from_slice(&header_bytes);
        let header = Self::parse_header(&mut buf, bucket)?;

        let index_len = header.count as usize * (K::WIDTH + 8);
        let mut index_bytes = vec![0u8; index_len];
        file.read_exact(&mut index_bytes).map_err(|_| {
            MetabaseError::CorruptedChunk(format!("bucket {}: index truncated", bucket))
        })?;
        let mut buf = Bytes::from(index_bytes);
        let index = Self::parse_index(&mut buf, header.count, bucket)?;
        Ok((header, index))
    }

    fn parse_header(buf: &mut Bytes, bucket: BucketId) -> Result<ChunkHeader> {
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != CHUNK_MAGIC {
            return Err(MetabaseError::CorruptedChunk(format!(
                "bucket {}: bad magic {:02x?}",
                bucket, magic
            )));
        }
        let version = buf.get_u16_le();
        if version != CHUNK_VERSION {
            return Err(MetabaseError::CorruptedChunk(format!(
                "bucket {}: unsupported version {}",
                bucket, version
            )));
        }
        let flags = buf.get_u16_le();
        let file_bucket = buf.get_u64_le();
        if file_bucket != bucket {
            return Err(MetabaseError::CorruptedChunk(format!(
                "bucket {}: file claims bucket {}",
                bucket, file_bucket
            )));
        }
        let count = buf.get_u32_le();
        Ok(ChunkHeader { flags, count })
    }

    fn parse_index(buf: &mut Bytes, count: u32, bucket: BucketId) -> Result<Vec<IndexEntry<K>>> {
        let need = count as usize * (K::WIDTH + 8);
        if buf.remaining() < need {
            return Err(MetabaseError::CorruptedChunk(format!(
                "bucket {}: index truncated",
                bucket
            )));
        }
        let mut index = Vec::with_capacity(count as usize);
        let mut prev: Option<K> = None;
        for _ in 0..count {
            let key = K::decode(buf)?;
            let offset = buf.get_u32_le();
            let length = buf.get_u32_le();
            if let Some(prev) = prev {
                if prev >= key {
                    return Err(MetabaseError::CorruptedChunk(format!(
                        "bucket {}: index keys not strictly increasing",
                        bucket
                    )));
                }
            }
            prev = Some(key);
            index.push(IndexEntry {
                key,
                offset,
                length,
            });
        }
        Ok(index)
    }

    fn slice_record(payload: &[u8], entry: &IndexEntry<K>) -> Result<Vec<u8>> {
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        if end > payload.len() {
            return Err(MetabaseError::CorruptedChunk(format!(
                "record slice {}..{} outside payload of {} bytes",
                start,
                end,
                payload.len()
            )));
        }
        Ok(payload[start..end].to_vec())
    }
}
