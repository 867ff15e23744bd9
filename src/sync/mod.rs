//! Keeping local layer stores in step with their remote sources.
//!
//! Static layers are replaced wholesale when the published file changes.
//! Remote layers are pulled one sector at a time, only for the sectors a
//! viewer actually looks at.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::{SectorRecord, System};
use crate::remote::RATE_LIMIT_ABORT_THRESHOLD;
use crate::sectors::{SectorGrid, SectorNumber};

pub mod engine;
pub mod freshness;
pub mod static_layer;

pub use engine::{RemoteLayer, SectorSyncEngine};
pub use freshness::FreshnessChecker;
pub use static_layer::StaticLayerSync;

pub const DEFAULT_MAX_RADIUS: f64 = 500.0;
pub const DEFAULT_FETCH_PARALLELISM: usize = 5;

/// What we know about a sector's cached systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorState {
    /// Never requested.
    Unknown,
    /// Requested, but never confirmed or known to be behind the remote.
    Stale,
    /// Confirmed against the remote.
    Fresh,
}

impl SectorState {
    pub fn of(record: Option<&SectorRecord>) -> Self {
        match record {
            None => SectorState::Unknown,
            Some(record) if record.updated_date.is_some() => SectorState::Fresh,
            Some(_) => SectorState::Stale,
        }
    }
}

/// When a cached sector may be served without asking the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum CachePolicy {
    /// Serve anything cached; only unconfirmed sectors hit the network.
    #[default]
    Optimistic,
    /// Probe `Last-Modified` for every confirmed sector before serving it.
    Revalidate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub grid: SectorGrid,
    pub max_radius: f64,
    pub fetch_parallelism: usize,
    pub rate_limit_threshold: Duration,
    pub cache_policy: CachePolicy,
    /// Re-query confirmed sectors that came back empty last time.
    pub refetch_empty_sectors: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            grid: SectorGrid::default(),
            max_radius: DEFAULT_MAX_RADIUS,
            fetch_parallelism: DEFAULT_FETCH_PARALLELISM,
            rate_limit_threshold: RATE_LIMIT_ABORT_THRESHOLD,
            cache_policy: CachePolicy::default(),
            refetch_empty_sectors: false,
        }
    }
}

/// Systems of a viewing region plus what went wrong while gathering them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionResult {
    /// Unique by exact coordinate.
    pub systems: Vec<System>,
    pub failed_sectors: Vec<SectorNumber>,
    pub fetched_sectors: Vec<SectorNumber>,
    /// The remote quota stopped the pass before every sector was fetched.
    pub aborted: bool,
}

/// Outcome of a layer-wide resync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub layer: String,
    pub checked: usize,
    pub refreshed: usize,
    pub up_to_date: usize,
    pub failed: Vec<SectorNumber>,
    pub systems_written: usize,
    pub aborted: bool,
}

impl SyncReport {
    pub fn new(layer: &str) -> Self {
        Self {
            layer: layer.to_string(),
            ..Self::default()
        }
    }
}

/// Keep the first system seen at each exact coordinate.
pub fn dedup_by_coordinate(systems: Vec<System>) -> Vec<System> {
    let mut seen = HashSet::with_capacity(systems.len());
    systems
        .into_iter()
        .filter(|system| seen.insert(system.coords().key()))
        .collect()
}
