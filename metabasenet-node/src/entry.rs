//! Entry sequencer
//!
//! Owns the bootstrap: validate the environment, lock the data directory,
//! attach the mode's modules, hand control to the container, orchestrate
//! exit. Held and passed explicitly by `main`; there is no process-wide
//! instance.

use std::fmt;

use metabasenet_core::config::MINIMUM_DISK_AVAILABLE;
use metabasenet_core::ctsdb::{CtsConfig, CtsDb, DirLock};
use metabasenet_core::docker::{Docker, ModuleKind};
use metabasenet_core::{MetabaseError, Uint224};
use tracing::info;

use crate::config::Config;
use crate::modules;
use crate::modules::datastat::{StatRecord, DATASTAT_DB};

/// Databases the node manages under its data directory
const MANAGED_DATABASES: &[&str] = &[DATASTAT_DB];

/// Bootstrap failures, mapped onto process exit codes.
#[derive(Debug)]
pub enum EntryError {
    /// Invalid configuration (exit code 1)
    Config(String),
    /// Disk or lock problem (exit code 2)
    Environment(String),
    /// A module failed to initialize or run (exit code 3)
    Module(MetabaseError),
}

impl EntryError {
    pub fn exit_code(&self) -> i32 {
        match self {
            EntryError::Config(_) => 1,
            EntryError::Environment(_) => 2,
            EntryError::Module(_) => 3,
        }
    }
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryError::Config(msg) => write!(f, "configuration error: {}", msg),
            EntryError::Environment(msg) => write!(f, "environment error: {}", msg),
            EntryError::Module(e) => write!(f, "module error: {}", e),
        }
    }
}

impl std::error::Error for EntryError {}

/// The node bootstrap: container plus the data-directory lock.
pub struct Entry {
    config: Config,
    docker: Docker,
    _lock: Option<DirLock>,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").field("config", &self.config).finish()
    }
}

impl Entry {
    /// Validate the environment and attach the selected mode's modules.
    pub fn bootstrap(config: Config) -> Result<Self, EntryError> {
        validate_data_dir(&config)?;

        let mut docker = Docker::new();
        let mut lock = None;
        for kind in config.mode.modules() {
            match kind {
                ModuleKind::Lock => {
                    lock = Some(acquire_lock(&config)?);
                }
                kind => {
                    modules::attach_kind(&mut docker, *kind, &config)
                        .map_err(EntryError::Module)?;
                }
            }
        }

        info!(
            mode = ?config.mode,
            modules = docker.module_count(),
            data_dir = %config.data_dir.display(),
            testnet = config.testnet,
            "node bootstrap complete"
        );
        Ok(Self {
            config,
            docker,
            _lock: lock,
        })
    }

    /// Initialize and run every attached module.
    pub fn run(&mut self) -> Result<(), EntryError> {
        self.docker.run().map_err(EntryError::Module)?;
        info!(version = metabasenet_core::VERSION, "metabasenet node running");
        Ok(())
    }

    /// Shut the container down; safe to call more than once.
    pub fn exit(&mut self) {
        self.docker.exit();
        if self.config.daemon {
            info!("daemon session ended");
        }
    }

    /// The module container (primarily for inspection in tests)
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Lock the data directory and drop every chunk of every managed
    /// database. Bypasses the mode registry entirely; the lock file
    /// itself remains on disk.
    pub fn purge(config: &Config) -> Result<(), EntryError> {
        validate_data_dir(config)?;
        let _lock = acquire_lock(config)?;

        for &db_name in MANAGED_DATABASES {
            let path = config.data_dir.join(db_name);
            if !path.exists() {
                continue;
            }
            let db: CtsDb<Uint224, StatRecord> = CtsDb::new();
            db.initialize(
                &path,
                CtsConfig {
                    bucket_width: config.bucket_width,
                    compress: config.compress_chunks,
                },
            )
            .and_then(|_| db.remove_all())
            .and_then(|_| db.deinitialize())
            .map_err(EntryError::Module)?;
            info!(database = db_name, "storage purged");
        }
        Ok(())
    }
}

fn validate_data_dir(config: &Config) -> Result<(), EntryError> {
    let dir = &config.data_dir;
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| {
            EntryError::Environment(format!("failed to create {}: {}", dir.display(), e))
        })?;
    }
    if !dir.is_dir() {
        return Err(EntryError::Environment(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let available = fs2::available_space(dir).map_err(|e| {
        EntryError::Environment(format!("cannot stat {}: {}", dir.display(), e))
    })?;
    if available < MINIMUM_DISK_AVAILABLE {
        return Err(EntryError::Environment(format!(
            "less than 100MB available in {}",
            dir.display()
        )));
    }
    Ok(())
}

fn acquire_lock(config: &Config) -> Result<DirLock, EntryError> {
    DirLock::acquire(&config.data_dir).map_err(|e| match e {
        MetabaseError::LockContended(path) => EntryError::Environment(format!(
            "cannot lock {}; metabasenet is probably already running",
            path.display()
        )),
        other => EntryError::Environment(other.to_string()),
    })
}

/// Install the diagnostics sink. Safe to call once per process; the
/// kernel only ever emits through whatever subscriber is installed here.
pub fn init_logging(config: &Config) {
    let default_level = if config.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Wait for Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
