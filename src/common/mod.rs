//! Common utilities and types shared across tsdb-repair

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod tracepoint;
pub mod utils;

pub use config::{Config, RepairOptions, RetentionOptions};
pub use context::Context;
pub use error::{Error, MultiError, Result};
pub use metrics::{MetricsRegistry, Scope};
pub use utils::{
    add_duration, crc32, format_duration, init_tracing, parse_duration, sub_duration,
    system_now_fn, truncate, NowFn,
};
