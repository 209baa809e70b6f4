//! Runtime dependencies of the repairers

use std::sync::Arc;

use crate::common::{system_now_fn, Config, NowFn, RepairOptions, RetentionOptions, Scope};
use crate::repair::client::AdminClient;

/// Everything a database repairer is built from: the node's static config plus
/// the live collaborators (peer client, clock, metrics).
#[derive(Clone)]
pub struct Options {
    pub host_id: String,
    pub retention: RetentionOptions,
    pub repair: Option<RepairOptions>,
    pub admin_client: Option<Arc<dyn AdminClient>>,
    pub now_fn: NowFn,
    pub scope: Scope,
}

impl Options {
    pub fn new(host_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            retention: RetentionOptions::default(),
            repair: None,
            admin_client: None,
            now_fn: system_now_fn(),
            scope: Scope::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            retention: config.retention.clone(),
            repair: config.repair.clone(),
            ..Self::new(config.node_id.clone())
        }
    }

    pub fn with_retention(mut self, retention: RetentionOptions) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_repair(mut self, repair: RepairOptions) -> Self {
        self.repair = Some(repair);
        self
    }

    pub fn with_admin_client(mut self, client: Arc<dyn AdminClient>) -> Self {
        self.admin_client = Some(client);
        self
    }

    pub fn with_now_fn(mut self, now_fn: NowFn) -> Self {
        self.now_fn = now_fn;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("host_id", &self.host_id)
            .field("retention", &self.retention)
            .field("repair", &self.repair)
            .field("admin_client", &self.admin_client.is_some())
            .finish_non_exhaustive()
    }
}
