//! Runtime statistics persisted through the time-series store

use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use metabasenet_core::codec::Codec;
use metabasenet_core::ctsdb::{CtsConfig, CtsDb};
use metabasenet_core::docker::{Module, ModuleContext};
use metabasenet_core::util::time::{now_utc_millis, now_utc_seconds};
use metabasenet_core::{Result, Timestamp, Uint224};
use parking_lot::Mutex;
use tracing::info;

/// Database subdirectory under the node data directory
pub const DATASTAT_DB: &str = "datastat";

const SAMPLE_STARTUP: u8 = 1;
const SAMPLE_SHUTDOWN: u8 = 2;

/// One lifecycle sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatRecord {
    pub kind: u8,
    pub recorded_at: u32,
    pub uptime_seconds: u32,
}

impl Codec for StatRecord {
    fn encode(&self, buf: &mut BytesMut) {
        self.kind.encode(buf);
        self.recorded_at.encode(buf);
        self.uptime_seconds.encode(buf);
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            kind: u8::decode(buf)?,
            recorded_at: u32::decode(buf)?,
            uptime_seconds: u32::decode(buf)?,
        })
    }
}

// Sample keys carry the kind and the millisecond instant, so concurrent
// samples of different kinds never collide within a bucket.
fn sample_key(kind: u8, millis: u64) -> Uint224 {
    let mut bytes = [0u8; 28];
    bytes[0] = kind;
    bytes[20..28].copy_from_slice(&millis.to_be_bytes());
    Uint224(bytes)
}

/// Statistics module; owns the `datastat` time-series database.
pub struct DataStatModule {
    dir: PathBuf,
    config: CtsConfig,
    db: CtsDb<Uint224, StatRecord>,
    started_at: Mutex<Option<Timestamp>>,
}

impl DataStatModule {
    pub fn new(dir: PathBuf, config: CtsConfig) -> Arc<Self> {
        Arc::new(Self {
            dir,
            config,
            db: CtsDb::new(),
            started_at: Mutex::new(None),
        })
    }

    fn record(&self, kind: u8) -> Result<()> {
        let now = now_utc_seconds();
        let uptime = self
            .started_at
            .lock()
            .map_or(0, |started| now.saturating_sub(started));
        let record = StatRecord {
            kind,
            recorded_at: now as u32,
            uptime_seconds: uptime as u32,
        };
        self.db.update(now, sample_key(kind, now_utc_millis()), record)
    }
}

impl Module for DataStatModule {
    fn name(&self) -> &'static str {
        "datastat"
    }

    fn initialize(&self, _ctx: &ModuleContext<'_>) -> Result<()> {
        self.db.initialize(&self.dir, self.config.clone())?;
        Ok(())
    }

    fn run(&self) -> Result<()> {
        *self.started_at.lock() = Some(now_utc_seconds());
        self.record(SAMPLE_STARTUP)?;
        self.db.flush()
    }

    fn halt(&self) -> Result<()> {
        self.record(SAMPLE_SHUTDOWN)?;
        self.db.flush()?;
        info!("data statistics flushed");
        Ok(())
    }

    fn deinitialize(&self) -> Result<()> {
        if self.db.is_open() {
            self.db.deinitialize()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metabasenet_core::docker::Docker;
    use tempfile::TempDir;

    #[test]
    fn test_lifecycle_samples_persisted() {
        let dir = TempDir::new().unwrap();
        let module = DataStatModule::new(dir.path().join(DATASTAT_DB), CtsConfig::default());

        let mut docker = Docker::new();
        docker.attach(module);
        docker.run().unwrap();
        docker.exit();

        // Startup and shutdown samples reached disk
        let db: CtsDb<Uint224, StatRecord> = CtsDb::new();
        db.initialize(&dir.path().join(DATASTAT_DB), CtsConfig::default())
            .unwrap();
        let mut kinds = Vec::new();
        let now = now_utc_seconds();
        db.walk_through(now.saturating_sub(7200), now + 3600, &mut |_, r| {
            kinds.push(r.kind);
            metabasenet_core::ctsdb::WalkControl::Continue
        })
        .unwrap();
        assert!(kinds.contains(&SAMPLE_STARTUP));
        assert!(kinds.contains(&SAMPLE_SHUTDOWN));
    }

    #[test]
    fn test_sample_keys_order_by_time() {
        let a = sample_key(SAMPLE_STARTUP, 1_000);
        let b = sample_key(SAMPLE_STARTUP, 2_000);
        assert!(a < b);
        assert_ne!(sample_key(SAMPLE_STARTUP, 1_000), sample_key(SAMPLE_SHUTDOWN, 1_000));
    }
}
