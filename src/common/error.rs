//! Error types for tsdb-repair

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::storage::{NamespaceId, ShardId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("no repair options")]
    NoRepairOptions,

    // === Peer Errors ===
    #[error("Admin session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    // === Repair Errors ===
    #[error("repair already in progress")]
    RepairInProgress,

    #[error("namespace {namespace} failed to repair time {time}: {source}")]
    NamespaceRepair {
        namespace: NamespaceId,
        time: DateTime<Utc>,
        #[source]
        source: Box<Error>,
    },

    #[error("shard {shard} failed to repair: {source}")]
    ShardRepair {
        shard: ShardId,
        #[source]
        source: Box<Error>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Multi(MultiError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a failure a later pass can be expected to get past?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::SessionUnavailable(_) | Error::Fetch(_) | Error::Cancelled => true,
            Error::NamespaceRepair { source, .. } | Error::ShardRepair { source, .. } => {
                source.is_retryable()
            }
            Error::Multi(multi) => multi.errors().iter().all(Error::is_retryable),
            _ => false,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

/// Collects independent failures without short-circuiting.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, err: Error) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// `Ok` when nothing was collected, the error itself when exactly one was,
    /// and `Error::Multi` otherwise.
    pub fn final_error(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Multi(self)),
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred: ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl Extend<Error> for MultiError {
    fn extend<I: IntoIterator<Item = Error>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}
