//! Node configuration
//!
//! The CLI surface the node is driven by; everything the kernel consumes
//! arrives through [`Config`].

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use metabasenet_core::config as limits;
use metabasenet_core::docker::Mode;

use crate::entry::EntryError;

/// Command-line arguments (clap supplies `--help` and `--version`)
#[derive(Debug, Parser)]
#[command(name = "metabasenet", version, about = "MetabaseNet blockchain node")]
pub struct Cli {
    /// Data directory; defaults to ~/.metabasenet
    #[arg(long, value_name = "path")]
    pub datadir: Option<PathBuf>,

    /// Run mode: server, miner or client
    #[arg(long, default_value = "server")]
    pub mode: String,

    /// Purge all chunk storage and exit
    #[arg(long)]
    pub purge: bool,

    /// Detach from the controlling terminal (recorded; supervision is
    /// left to the service manager)
    #[arg(long)]
    pub daemon: bool,

    /// Join the test network
    #[arg(long)]
    pub testnet: bool,

    /// Verbose diagnostics
    #[arg(long)]
    pub debug: bool,

    /// Disable the signing wallet; a dummy realization is used instead
    #[arg(long)]
    pub no_wallet: bool,

    /// Time bucket width for chunk storage, in seconds
    #[arg(long, value_name = "seconds", default_value_t = limits::BUCKET_WIDTH_SECONDS)]
    pub bucket_width: u64,

    /// Store chunk payloads uncompressed
    #[arg(long)]
    pub no_compress: bool,

    /// JSON-RPC listen address
    #[arg(long, value_name = "addr", default_value = "127.0.0.1:8812")]
    pub rpc_listen: SocketAddr,

    /// Log file size cap in megabytes (1-2048)
    #[arg(long, value_name = "mb", default_value_t = 200)]
    pub log_file_size: u64,

    /// Number of rotated log files to keep (2-2147483647)
    #[arg(long, value_name = "count", default_value_t = 100)]
    pub log_history_size: u64,
}

/// Validated node configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub mode: Mode,
    /// Purge storage and exit instead of running the mode's modules
    pub purge: bool,
    pub bucket_width: u64,
    pub compress_chunks: bool,
    pub testnet: bool,
    pub debug: bool,
    pub daemon: bool,
    pub wallet_enabled: bool,
    pub rpc_listen: SocketAddr,
    pub log_file_size: u64,
    pub log_history_size: u64,
}

impl Config {
    /// Resolve and validate the CLI arguments.
    pub fn from_cli(cli: Cli) -> Result<Self, EntryError> {
        // `--mode purge` is accepted as a spelling of `--purge`; the mode
        // registry itself only knows server, miner and client.
        let purge = cli.purge || cli.mode.eq_ignore_ascii_case("purge");
        let mode = if cli.mode.eq_ignore_ascii_case("purge") {
            Mode::Server
        } else {
            cli.mode
                .parse::<Mode>()
                .map_err(|e| EntryError::Config(e.to_string()))?
        };

        let config = Self {
            data_dir: cli.datadir.unwrap_or_else(default_data_dir),
            mode,
            purge,
            bucket_width: cli.bucket_width,
            compress_chunks: !cli.no_compress,
            testnet: cli.testnet,
            debug: cli.debug,
            daemon: cli.daemon,
            wallet_enabled: !cli.no_wallet,
            rpc_listen: cli.rpc_listen,
            log_file_size: cli.log_file_size,
            log_history_size: cli.log_history_size,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EntryError> {
        if self.bucket_width == 0 {
            return Err(EntryError::Config(
                "bucket width must be positive".into(),
            ));
        }
        let (lo, hi) = limits::LOG_FILE_SIZE_RANGE;
        if !(lo..=hi).contains(&self.log_file_size) {
            return Err(EntryError::Config(format!(
                "log file size beyond range ({} - {}): {}",
                lo, hi, self.log_file_size
            )));
        }
        let (lo, hi) = limits::LOG_HISTORY_RANGE;
        if !(lo..=hi).contains(&self.log_history_size) {
            return Err(EntryError::Config(format!(
                "log history size beyond range ({} - {}): {}",
                lo, hi, self.log_history_size
            )));
        }
        Ok(())
    }
}

/// Unix: `~/.metabasenet`; falls back to the working directory when no
/// home is set.
fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(".metabasenet"),
        _ => PathBuf::from(".metabasenet"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("metabasenet").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_cli(cli(&["--datadir", "/tmp/mbn"])).unwrap();
        assert_eq!(config.mode, Mode::Server);
        assert!(!config.purge);
        assert_eq!(config.bucket_width, 3600);
        assert!(config.compress_chunks);
        assert!(config.wallet_enabled);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/mbn"));
    }

    #[test]
    fn test_purge_flag() {
        let config = Config::from_cli(cli(&["--mode", "miner", "--purge"])).unwrap();
        assert!(config.purge);
        assert_eq!(config.mode, Mode::Miner);

        // the original mode spelling still works
        let config = Config::from_cli(cli(&["--mode", "purge"])).unwrap();
        assert!(config.purge);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let err = Config::from_cli(cli(&["--mode", "turbo"])).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_log_ranges_enforced() {
        assert!(Config::from_cli(cli(&["--log-file-size", "0"])).is_err());
        assert!(Config::from_cli(cli(&["--log-file-size", "4096"])).is_err());
        assert!(Config::from_cli(cli(&["--log-history-size", "1"])).is_err());
        assert!(Config::from_cli(cli(&["--log-history-size", "2"])).is_ok());
    }

    #[test]
    fn test_bucket_width_positive() {
        let err = Config::from_cli(cli(&["--bucket-width", "0"])).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
