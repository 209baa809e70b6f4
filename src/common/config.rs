//! Configuration for tsdb-repair

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::common::utils::{duration_str, format_duration};
use crate::common::{Error, Result};

/// Prefix for environment overrides, e.g. `TSDB_REPAIR__REPAIR__REPAIR_MAX_RETRIES=5`.
pub const ENV_PREFIX: &str = "TSDB_REPAIR";

/// Node-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (this host's identity in the replica set)
    pub node_id: String,

    /// Retention of every namespace owned by the node
    #[serde(default)]
    pub retention: RetentionOptions,

    /// Repair scheduling; the repairer refuses to start without it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairOptions>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load from a TOML file, with environment overrides layered on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let cfg: Config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(Error::InvalidConfig("node_id cannot be empty".into()));
        }
        self.retention.validate()?;
        if let Some(repair) = &self.repair {
            repair.validate()?;
        }
        Ok(())
    }
}

/// Data retention shared by the node's namespaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionOptions {
    /// How long data is kept
    #[serde(with = "duration_str", default = "default_retention_period")]
    pub retention_period: Duration,

    /// Size of one time block; repairs always cover exactly one block
    #[serde(with = "duration_str", default = "default_block_size")]
    pub block_size: Duration,

    /// How far back writes may still land in the active buffer
    #[serde(with = "duration_str", default = "default_buffer_past")]
    pub buffer_past: Duration,
}

fn default_retention_period() -> Duration {
    Duration::from_secs(2 * 86400)
}
fn default_block_size() -> Duration {
    Duration::from_secs(2 * 3600)
}
fn default_buffer_past() -> Duration {
    Duration::from_secs(10 * 60)
}

impl Default for RetentionOptions {
    fn default() -> Self {
        Self {
            retention_period: default_retention_period(),
            block_size: default_block_size(),
            buffer_past: default_buffer_past(),
        }
    }
}

/// Longest supported retention period.
pub const MAX_RETENTION_PERIOD: Duration = Duration::from_secs(3650 * 86400);

/// Most block starts one retention window may hold.
pub const MAX_BLOCKS_PER_WINDOW: u128 = 100_000;

impl RetentionOptions {
    pub fn validate(&self) -> Result<()> {
        if self.block_size.is_zero() {
            return Err(Error::InvalidConfig("block_size must be positive".into()));
        }
        if self.block_size.subsec_nanos() % 1_000_000 != 0 {
            return Err(Error::InvalidConfig(
                "block_size must be a whole number of milliseconds".into(),
            ));
        }
        if self.retention_period > MAX_RETENTION_PERIOD {
            return Err(Error::InvalidConfig(format!(
                "retention_period must not exceed {}",
                format_duration(MAX_RETENTION_PERIOD)
            )));
        }
        if self.retention_period.as_millis() / self.block_size.as_millis() > MAX_BLOCKS_PER_WINDOW
        {
            return Err(Error::InvalidConfig(format!(
                "retention_period spans more than {} blocks of block_size",
                MAX_BLOCKS_PER_WINDOW
            )));
        }
        if self.retention_period < self.block_size {
            return Err(Error::InvalidConfig(
                "retention_period must be at least one block_size".into(),
            ));
        }
        if self.buffer_past >= self.block_size {
            return Err(Error::InvalidConfig(
                "buffer_past must be smaller than block_size".into(),
            ));
        }
        Ok(())
    }
}

/// Repair scheduling and fan-out options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairOptions {
    /// Period between scheduling slots; zero disables background repair
    #[serde(with = "duration_str", default = "default_repair_interval")]
    pub repair_interval: Duration,

    /// Fixed delay after an interval boundary before that interval's pass may run
    #[serde(with = "duration_str", default = "default_repair_time_offset")]
    pub repair_time_offset: Duration,

    /// Upper bound of the random per-process delay added to the offset
    #[serde(with = "duration_str", default = "default_repair_time_jitter")]
    pub repair_time_jitter: Duration,

    /// Polling granularity of the run loop
    #[serde(with = "duration_str", default = "default_repair_check_interval")]
    pub repair_check_interval: Duration,

    /// Retries for a failed block before it is abandoned
    #[serde(default = "default_repair_max_retries")]
    pub repair_max_retries: u32,

    /// Shards of one namespace compared concurrently
    #[serde(default = "default_repair_shard_concurrency")]
    pub repair_shard_concurrency: usize,

    /// Pause after each shard comparison
    #[serde(with = "duration_str", default = "default_repair_throttle")]
    pub repair_throttle: Duration,
}

fn default_repair_interval() -> Duration {
    Duration::from_secs(2 * 3600)
}
fn default_repair_time_offset() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_repair_time_jitter() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_repair_check_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_repair_max_retries() -> u32 {
    3
}
fn default_repair_shard_concurrency() -> usize {
    1
}
fn default_repair_throttle() -> Duration {
    Duration::from_secs(90)
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            repair_interval: default_repair_interval(),
            repair_time_offset: default_repair_time_offset(),
            repair_time_jitter: default_repair_time_jitter(),
            repair_check_interval: default_repair_check_interval(),
            repair_max_retries: default_repair_max_retries(),
            repair_shard_concurrency: default_repair_shard_concurrency(),
            repair_throttle: default_repair_throttle(),
        }
    }
}

impl RepairOptions {
    /// Is background repair enabled at all?
    pub fn is_enabled(&self) -> bool {
        !self.repair_interval.is_zero()
    }

    pub fn validate(&self) -> Result<()> {
        if self.repair_shard_concurrency == 0 {
            return Err(Error::InvalidConfig(
                "repair_shard_concurrency must be positive".into(),
            ));
        }
        if !self.is_enabled() {
            return Ok(());
        }
        if self.repair_check_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "repair_check_interval must be positive".into(),
            ));
        }
        if self.repair_check_interval > self.repair_interval {
            return Err(Error::InvalidConfig(
                "repair_check_interval must not exceed repair_interval".into(),
            ));
        }
        let latest_start = self
            .repair_time_offset
            .checked_add(self.repair_time_jitter)
            .ok_or_else(|| {
                Error::InvalidConfig("repair_time_offset + repair_time_jitter overflows".into())
            })?;
        if latest_start >= self.repair_interval {
            return Err(Error::InvalidConfig(
                "repair_time_offset + repair_time_jitter must be less than repair_interval"
                    .into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_options_are_valid() {
        assert!(RetentionOptions::default().validate().is_ok());
        assert!(RepairOptions::default().validate().is_ok());
    }

    #[test]
    fn test_disabled_repair_skips_schedule_checks() {
        let opts = RepairOptions {
            repair_interval: Duration::ZERO,
            repair_check_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(!opts.is_enabled());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_invalid_repair_options() {
        let too_coarse = RepairOptions {
            repair_check_interval: Duration::from_secs(3 * 3600),
            ..Default::default()
        };
        assert!(too_coarse.validate().is_err());

        let late = RepairOptions {
            repair_time_offset: Duration::from_secs(3600),
            repair_time_jitter: Duration::from_secs(3600),
            ..Default::default()
        };
        assert!(late.validate().is_err());

        let no_workers = RepairOptions {
            repair_shard_concurrency: 0,
            ..Default::default()
        };
        assert!(no_workers.validate().is_err());
    }

    #[test]
    fn test_invalid_retention() {
        let opts = RetentionOptions {
            buffer_past: Duration::from_secs(3 * 3600),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_retention_window_bounded() {
        let ten_years = RetentionOptions {
            retention_period: MAX_RETENTION_PERIOD,
            ..Default::default()
        };
        assert!(ten_years.validate().is_ok());

        let too_long = RetentionOptions {
            retention_period: MAX_RETENTION_PERIOD + Duration::from_secs(86400),
            ..Default::default()
        };
        assert!(matches!(too_long.validate(), Err(Error::InvalidConfig(_))));

        let huge = RetentionOptions {
            retention_period: Duration::MAX,
            ..Default::default()
        };
        assert!(matches!(huge.validate(), Err(Error::InvalidConfig(_))));

        let too_many_blocks = RetentionOptions {
            retention_period: Duration::from_secs(30 * 86400),
            block_size: Duration::from_secs(10),
            buffer_past: Duration::from_secs(1),
        };
        assert!(matches!(too_many_blocks.validate(), Err(Error::InvalidConfig(_))));

        let sub_millisecond = RetentionOptions {
            block_size: Duration::from_micros(7_200_000_500),
            ..Default::default()
        };
        assert!(matches!(sub_millisecond.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_offset_plus_jitter_overflow_is_config_error() {
        let opts = RepairOptions {
            repair_time_offset: Duration::from_secs(u64::MAX),
            repair_time_jitter: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load_rejects_overflowing_schedule() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
node_id = "node-a"

[repair]
repair_time_offset = "18446744073709551615s"
repair_time_jitter = "1s"
"#
        )
        .unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
node_id = "node-a"

[retention]
retention_period = "1d"
block_size = "1h"
buffer_past = "5m"

[repair]
repair_interval = "1d"
repair_time_offset = "1h"
repair_time_jitter = "0"
repair_check_interval = "1s"
repair_max_retries = 5
"#
        )
        .unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.node_id, "node-a");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.retention.block_size, Duration::from_secs(3600));
        let repair = cfg.repair.unwrap();
        assert_eq!(repair.repair_interval, Duration::from_secs(86400));
        assert_eq!(repair.repair_time_jitter, Duration::ZERO);
        assert_eq!(repair.repair_max_retries, 5);
        assert_eq!(repair.repair_throttle, default_repair_throttle());
    }

    #[test]
    fn test_serialize_durations_as_strings() {
        let json = serde_json::to_value(RetentionOptions::default()).unwrap();
        assert_eq!(json["block_size"], "2h");
        assert_eq!(json["retention_period"], "2d");
    }
}
