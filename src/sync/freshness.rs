use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::{Database, SectorRecord};
use crate::error::SyncError;
use crate::remote::RemoteSource;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Decides whether local data is behind its remote copy by comparing the
/// remote `Last-Modified` with the time we last imported it.
#[derive(Clone)]
pub struct FreshnessChecker {
    remote: Arc<dyn RemoteSource>,
}

impl FreshnessChecker {
    pub fn new(remote: Arc<dyn RemoteSource>) -> Self {
        Self { remote }
    }

    /// Whether a bulk-imported namespace needs a new import of `resource`.
    pub async fn is_stale(&self, store: &Database, resource: &str) -> Result<bool, SyncError> {
        let imported = store.import_date().await?;
        self.is_newer_remotely(imported, resource).await
    }

    /// Whether the cached systems of one sector need refetching.
    pub async fn is_sector_stale(
        &self,
        record: &SectorRecord,
        resource: &str,
    ) -> Result<bool, SyncError> {
        self.is_newer_remotely(record.updated_date, resource).await
    }

    async fn is_newer_remotely(
        &self,
        local: Option<DateTime<Utc>>,
        resource: &str,
    ) -> Result<bool, SyncError> {
        let Some(local) = local else {
            log_debug!("{resource}: never imported");
            return Ok(true);
        };
        let remote = self.remote.last_modified(resource).await?;
        let stale = is_stale_against(local, remote);
        log_debug!("{resource}: local {local}, remote {remote:?}, stale={stale}");
        Ok(stale)
    }
}

/// Unknown remote timestamps count as stale.
pub fn is_stale_against(local: DateTime<Utc>, remote: Option<DateTime<Utc>>) -> bool {
    match remote {
        Some(remote) => local < remote,
        None => true,
    }
}
