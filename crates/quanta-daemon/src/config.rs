// crates/quanta-daemon/src/config.rs
//
// Runtime configuration for the payout daemon.
// Loaded from a TOML file or populated with sensible defaults.

use serde::Deserialize;
use std::fs;

use quanta_core::error::QuantaError;
use quanta_core::money::{PayoutFraction, DEFAULT_PAYOUT_BPS};

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Directory for local data storage (RocksDB).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Share of gross units paid to recipients, in basis points.
    #[serde(default = "default_payout_bps")]
    pub payout_bps: u32,

    /// Seconds between scheduled reconcile passes in `run` mode.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Capacity of the job queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Storage backend: "rocksdb" or "memory".
    /// The memory backend does not survive the process and only makes sense for `run`.
    #[serde(default = "default_store")]
    pub store: String,
}

fn default_data_dir() -> String {
    "~/.quanta/data".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_payout_bps() -> u32 {
    DEFAULT_PAYOUT_BPS
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_queue_depth() -> usize {
    64
}

fn default_store() -> String {
    "rocksdb".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            payout_bps: default_payout_bps(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            queue_depth: default_queue_depth(),
            store: default_store(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: DaemonConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// The configured payout fraction, validated to `1..=10_000` bps.
    pub fn payout_fraction(&self) -> Result<PayoutFraction, QuantaError> {
        PayoutFraction::from_bps(self.payout_bps)
    }

    /// Check every field that has a constrained range.
    pub fn validate(&self) -> Result<(), QuantaError> {
        self.payout_fraction()?;
        if self.reconcile_interval_secs == 0 {
            return Err(QuantaError::InvalidState(
                "reconcile_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(QuantaError::InvalidState(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        match self.store.as_str() {
            "rocksdb" | "memory" => Ok(()),
            other => Err(QuantaError::InvalidState(format!(
                "Unknown store backend '{}', expected 'rocksdb' or 'memory'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.payout_bps, 9_500);
        assert_eq!(config.store, "rocksdb");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = DaemonConfig::parse("payout_bps = 9000\nstore = \"memory\"\n").unwrap();
        assert_eq!(config.payout_fraction().unwrap().bps(), 9_000);
        assert_eq!(config.store, "memory");
        assert_eq!(config.queue_depth, 64);
        assert_eq!(config.data_dir, "~/.quanta/data");
    }

    #[test]
    fn test_payout_bps_out_of_range() {
        for bps in [0, 10_001] {
            let config = DaemonConfig {
                payout_bps: bps,
                ..DaemonConfig::default()
            };
            assert!(config.validate().is_err());
        }
        let full = DaemonConfig {
            payout_bps: 10_000,
            ..DaemonConfig::default()
        };
        assert!(full.validate().is_ok());
    }

    #[test]
    fn test_unknown_store_rejected() {
        let config = DaemonConfig {
            store: "postgres".to_string(),
            ..DaemonConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        assert!(DaemonConfig::parse("payout_bps = \"lots\"").is_err());
    }
}
