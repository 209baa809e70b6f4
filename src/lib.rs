//! # tsdb-repair
//!
//! Anti-entropy repair for a replicated, sharded time-series node:
//! - Metadata-only comparison of a shard's block against every replica
//! - A background scheduler covering the whole retention window
//! - Bounded per-block retries and at most one pass in flight
//! - Jittered start times so a fleet does not repair in lockstep
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            DatabaseRepairer              │
//! │  poll loop → pass → block starts (desc)  │
//! │  retry ledger, running flag              │
//! └───────────┬──────────────────────────────┘
//!             │ per block start
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌───▼────────┐
//! │ Namespace A│   │ Namespace B│   │ Namespace C│
//! │ per shard: │   │ per shard: │   │ per shard: │
//! │ local+peer │   │ local+peer │   │ local+peer │
//! │ metadata   │   │ metadata   │   │ metadata   │
//! │ → diff     │   │ → diff     │   │ → diff     │
//! └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let config = tsdb_repair::Config::load("node.toml")?;
//! tsdb_repair::common::init_tracing(&config.log_level)?;
//!
//! let opts = Options::from_config(&config).with_admin_client(client);
//! let repairer = DatabaseRepairer::new(database, opts)?;
//! let handle = repairer.start();
//! // ...
//! repairer.stop();
//! ```

pub mod common;
pub mod repair;
pub mod storage;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use repair::{DatabaseRepairer, DefaultShardRepairer, Options};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
