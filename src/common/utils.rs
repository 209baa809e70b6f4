//! Utility functions for tsdb-repair

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Source of the current wall-clock time. Injected so schedules can be tested.
pub type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The system clock.
pub fn system_now_fn() -> NowFn {
    Arc::new(Utc::now)
}

/// Parse duration string (e.g., "30s", "5m", "1h", "7d")
pub fn parse_duration(s: &str) -> crate::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| crate::Error::InvalidConfig(format!("missing duration unit: {}", s)))?;
    let (num_str, unit) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    if unit == "ms" {
        return Ok(Duration::from_millis(num));
    }
    let secs_per_unit: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };
    let secs = num
        .checked_mul(secs_per_unit)
        .ok_or_else(|| crate::Error::InvalidConfig(format!("duration out of range: {}", s)))?;

    Ok(Duration::from_secs(secs))
}

/// Render a duration in the largest unit `parse_duration` accepts that divides it exactly.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    const UNITS: &[(u128, &str)] = &[
        (86_400_000, "d"),
        (3_600_000, "h"),
        (60_000, "m"),
        (1_000, "s"),
    ];
    for (size, unit) in UNITS {
        if millis % size == 0 {
            return format!("{}{}", millis / size, unit);
        }
    }
    format!("{}ms", millis)
}

/// Serde adapter for durations written as "30s", "1h", "2d".
pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// `t + d`, saturating at the representable range.
pub fn add_duration(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    t.checked_add_signed(to_delta(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `t - d`, saturating at the representable range.
pub fn sub_duration(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    t.checked_sub_signed(to_delta(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Round `t` down to a multiple of `d` since the Unix epoch (millisecond resolution).
/// A zero `d` returns `t` unchanged.
pub fn truncate(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    let step = i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
    if step <= 0 {
        return t;
    }
    let millis = t.timestamp_millis();
    let truncated = millis - millis.rem_euclid(step);
    DateTime::<Utc>::from_timestamp_millis(truncated).unwrap_or(t)
}

/// Calculate CRC32 checksum
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_tracing(level: &str) -> crate::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| crate::Error::Internal(format!("failed to install tracing subscriber: {}", e)))
}
