//! Sector-by-sector sync of remote layers.
//!
//! A viewing region is covered by whole sectors. Each sector is served from
//! the local store when we trust it and fetched from the cube API otherwise.
//! Fetches go out in small batches, spaced by the remote rate limit. A quota
//! that can no longer be honoured ends the pass early; everything resolved
//! so far is still returned.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::{Map, Value};

use super::{
    dedup_by_coordinate, CachePolicy, FreshnessChecker, RegionResult, SectorState, SyncOptions,
    SyncReport,
};
use crate::db::{Database, System};
use crate::error::SyncError;
use crate::models::{BoundingSphere, Coordinates, Layer, LayerKind};
use crate::remote::{RemoteSource, SectorQuery, Throttle};
use crate::sectors::{SectorGrid, SectorNumber};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// A remote layer together with the stores the engine reads and writes.
#[derive(Debug, Clone, Copy)]
pub struct RemoteLayer<'a> {
    pub name: &'a str,
    pub endpoint: &'a str,
    pub parameters: &'a BTreeMap<String, Value>,
    pub store: &'a Database,
    /// Stores of static layers; their systems win over remote duplicates.
    pub static_stores: &'a [Database],
}

impl<'a> RemoteLayer<'a> {
    /// `None` for static layers.
    pub fn new(layer: &'a Layer, store: &'a Database, static_stores: &'a [Database]) -> Option<Self> {
        match &layer.kind {
            LayerKind::Remote {
                endpoint,
                parameters,
            } => Some(Self {
                name: &layer.name,
                endpoint,
                parameters,
                store,
                static_stores,
            }),
            LayerKind::Static { .. } => None,
        }
    }

    pub fn query(&self, grid: &SectorGrid, sector: SectorNumber) -> SectorQuery {
        SectorQuery {
            endpoint: self.endpoint.to_string(),
            center: grid.bounds_for(sector).center,
            size: grid.sector_size,
            parameters: self.parameters.clone(),
        }
    }
}

enum SectorPlan {
    Cached(Vec<System>),
    Fetch,
}

/// Result of fetching one sector.
#[derive(Debug)]
pub struct SectorRefresh {
    /// Stored systems after the refresh; `None` when the response held no
    /// systems list and nothing was written.
    pub systems: Option<Vec<System>>,
    pub written: usize,
    /// Quota error raised by this response. The sector itself was stored.
    pub halt: Option<SyncError>,
}

pub struct SectorSyncEngine {
    remote: Arc<dyn RemoteSource>,
    freshness: FreshnessChecker,
    throttle: Throttle,
    options: SyncOptions,
}

impl SectorSyncEngine {
    pub fn new(remote: Arc<dyn RemoteSource>, options: SyncOptions) -> Self {
        Self {
            freshness: FreshnessChecker::new(remote.clone()),
            throttle: Throttle::new(options.rate_limit_threshold),
            remote,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Systems of every sector covering `sphere`. Never fails: broken
    /// sectors are reported in the result and logged.
    pub async fn resolve_region(
        &self,
        layer: &RemoteLayer<'_>,
        sphere: &BoundingSphere,
    ) -> RegionResult {
        let sectors = self
            .options
            .grid
            .range_covering(sphere, self.options.max_radius);
        log_debug!(
            "[{}] region {} r={} covers {} sectors",
            layer.name,
            sphere.center,
            sphere.radius,
            sectors.len()
        );

        let now = Utc::now();
        let mut result = RegionResult::default();
        let mut systems = Vec::new();
        let mut scheduled = Vec::new();

        for sector in sectors {
            match self.plan_sector(layer, sector, now).await {
                Ok(SectorPlan::Cached(cached)) => systems.extend(cached),
                Ok(SectorPlan::Fetch) => scheduled.push(sector),
                Err(err) => {
                    log_error!("[{}] failed to read sector {sector}: {err}", layer.name);
                    result.failed_sectors.push(sector);
                }
            }
        }

        let batch_size = self.options.fetch_parallelism.max(1);
        let mut remaining = scheduled.len();
        for batch in scheduled.chunks(batch_size) {
            let outcomes = join_all(batch.iter().map(|&sector| self.refresh_sector(layer, sector))).await;
            remaining -= batch.len();

            for (&sector, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(refresh) => {
                        if let Some(stored) = refresh.systems {
                            result.fetched_sectors.push(sector);
                            systems.extend(stored);
                        }
                        if let Some(err) = refresh.halt {
                            log_warn!("[{}] stopping after sector {sector}: {err}", layer.name);
                            result.aborted = true;
                        }
                    }
                    Err(err) if err.aborts_pass() => {
                        log_warn!("[{}] stopping at sector {sector}: {err}", layer.name);
                        result.aborted = true;
                    }
                    Err(err) => {
                        log_warn!("[{}] failed to fetch sector {sector}: {err}", layer.name);
                        result.failed_sectors.push(sector);
                    }
                }
            }

            if result.aborted {
                if remaining > 0 {
                    log_warn!("[{}] {remaining} sectors left unfetched", layer.name);
                }
                break;
            }
        }

        result.systems = dedup_by_coordinate(systems);
        result
    }

    async fn plan_sector(
        &self,
        layer: &RemoteLayer<'_>,
        sector: SectorNumber,
        now: DateTime<Utc>,
    ) -> Result<SectorPlan, SyncError> {
        let previous = layer.store.touch_sector(sector, now).await?;
        let state = SectorState::of(previous.as_ref());
        if state == SectorState::Unknown {
            return Ok(SectorPlan::Fetch);
        }

        let cached = layer.store.get_systems_in_sector(sector).await?;
        match self.options.cache_policy {
            CachePolicy::Optimistic => {
                if !cached.is_empty() {
                    return Ok(SectorPlan::Cached(cached));
                }
                if state == SectorState::Fresh && !self.options.refetch_empty_sectors {
                    return Ok(SectorPlan::Cached(cached));
                }
                Ok(SectorPlan::Fetch)
            }
            CachePolicy::Revalidate => {
                let Some(record) = previous.filter(|_| state == SectorState::Fresh) else {
                    return Ok(SectorPlan::Fetch);
                };
                let resource = layer.query(&self.options.grid, sector).url();
                match self.freshness.is_sector_stale(&record, &resource).await {
                    Ok(true) => Ok(SectorPlan::Fetch),
                    Ok(false) => Ok(SectorPlan::Cached(cached)),
                    Err(err) => {
                        log_warn!(
                            "[{}] could not revalidate sector {sector}, serving cache: {err}",
                            layer.name
                        );
                        Ok(SectorPlan::Cached(cached))
                    }
                }
            }
        }
    }

    /// Fetch one sector and atomically replace its cached systems.
    pub async fn refresh_sector(
        &self,
        layer: &RemoteLayer<'_>,
        sector: SectorNumber,
    ) -> Result<SectorRefresh, SyncError> {
        let query = layer.query(&self.options.grid, sector);
        let resource = query.url();

        self.throttle.wait_turn().await;
        let response = self.remote.fetch_sector(query).await?;
        let halt = self
            .throttle
            .record(response.quota, response.elapsed, &resource)
            .err();

        let parsed = response
            .body
            .as_ref()
            .and_then(|body| self.parse_sector_systems(layer.name, sector, body));
        let Some(systems) = parsed else {
            log_warn!(
                "[{}] sector {sector}: response held no systems list, nothing stored",
                layer.name
            );
            return Ok(SectorRefresh {
                systems: None,
                written: 0,
                halt,
            });
        };

        let systems = self.drop_static_duplicates(layer, sector, systems).await?;
        let report = layer
            .store
            .replace_sector_systems(sector, systems, Utc::now())
            .await?;
        let stored = layer.store.get_systems_in_sector(sector).await?;
        log_info!(
            "[{}] sector {sector}: stored {} systems ({} skipped)",
            layer.name,
            report.inserted,
            report.skipped
        );

        Ok(SectorRefresh {
            systems: Some(stored),
            written: report.inserted,
            halt,
        })
    }

    /// Re-check every sector the layer has ever shown, most recently viewed
    /// first. Runs one sector at a time and stops when the quota runs out.
    pub async fn sync_namespace(&self, layer: &RemoteLayer<'_>) -> Result<SyncReport, SyncError> {
        let records = layer.store.sector_records_by_recency().await?;
        let mut report = SyncReport::new(layer.name);
        log_info!("[{}] resyncing {} sectors", layer.name, records.len());

        for record in records {
            let sector = record.sector_number;
            report.checked += 1;

            let resource = layer.query(&self.options.grid, sector).url();
            let stale = match self.freshness.is_sector_stale(&record, &resource).await {
                Ok(stale) => stale,
                Err(err) => {
                    log_warn!("[{}] freshness probe failed for {sector}: {err}", layer.name);
                    report.failed.push(sector);
                    continue;
                }
            };
            if !stale {
                report.up_to_date += 1;
                continue;
            }

            match self.refresh_sector(layer, sector).await {
                Ok(refresh) => {
                    if refresh.systems.is_some() {
                        report.refreshed += 1;
                        report.systems_written += refresh.written;
                    }
                    if let Some(err) = refresh.halt {
                        log_warn!("[{}] resync stopped after {sector}: {err}", layer.name);
                        report.aborted = true;
                        break;
                    }
                }
                Err(err) if err.aborts_pass() => {
                    log_warn!("[{}] resync stopped at {sector}: {err}", layer.name);
                    report.aborted = true;
                    break;
                }
                Err(err) => {
                    log_warn!("[{}] failed to refresh sector {sector}: {err}", layer.name);
                    report.failed.push(sector);
                }
            }
        }

        log_info!(
            "[{}] resync done: {} refreshed, {} up to date, {} failed",
            layer.name,
            report.refreshed,
            report.up_to_date,
            report.failed.len()
        );
        Ok(report)
    }

    /// `None` unless the body is a list of systems (an empty object counts as
    /// an empty list). Records outside the sector are dropped.
    fn parse_sector_systems(
        &self,
        layer_name: &str,
        sector: SectorNumber,
        body: &Value,
    ) -> Option<Vec<System>> {
        let records: &[Value] = match body {
            Value::Array(records) => records,
            Value::Object(map) if map.is_empty() => &[],
            _ => return None,
        };

        let bounds = self.options.grid.bounds_for(sector);
        let mut systems = Vec::with_capacity(records.len());
        for record in records {
            match parse_remote_system(record) {
                Some(system) if bounds.contains(&system.coords()) => {
                    systems.push(system.with_sector(sector));
                }
                Some(system) => {
                    log_debug!(
                        "[{layer_name}] dropping {} at {}: outside sector {sector}",
                        system.system_name,
                        system.coords()
                    );
                }
                None => log_warn!("[{layer_name}] skipping malformed record in sector {sector}"),
            }
        }
        Some(systems)
    }

    async fn drop_static_duplicates(
        &self,
        layer: &RemoteLayer<'_>,
        sector: SectorNumber,
        systems: Vec<System>,
    ) -> Result<Vec<System>, SyncError> {
        if layer.static_stores.is_empty() || systems.is_empty() {
            return Ok(systems);
        }

        let bounds = self.options.grid.bounds_for(sector).as_box();
        let mut taken = HashSet::new();
        for store in layer.static_stores {
            for coords in store.coordinates_within(bounds).await? {
                taken.insert(coords.key());
            }
        }

        let before = systems.len();
        let kept: Vec<System> = systems
            .into_iter()
            .filter(|system| !taken.contains(&system.coords().key()))
            .collect();
        if kept.len() < before {
            log_debug!(
                "[{}] sector {sector}: {} systems already in static layers",
                layer.name,
                before - kept.len()
            );
        }
        Ok(kept)
    }
}

/// `{name, coords: {x, y, z}, ...}`; every other field lands in `system_info`.
fn parse_remote_system(record: &Value) -> Option<System> {
    let object = record.as_object()?;
    let name = object.get("name")?.as_str()?;
    let coords = object.get("coords")?;
    let coords = Coordinates::new(
        coords.get("x")?.as_f64()?,
        coords.get("y")?.as_f64()?,
        coords.get("z")?.as_f64()?,
    );

    let extra: Map<String, Value> = object
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "name" | "coords"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let system = System::new(name, coords);
    Some(if extra.is_empty() {
        system
    } else {
        system.with_info(Value::Object(extra))
    })
}
