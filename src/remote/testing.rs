//! Scripted in-memory `RemoteSource` for engine and service tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::rate_limit::RateQuota;
use super::{BoxFuture, RemoteSource, SectorQuery, SectorResponse};
use crate::error::SyncError;
use crate::models::Coordinates;
use crate::sectors::{SectorGrid, SectorNumber};

#[derive(Debug, Clone)]
pub enum ScriptedSector {
    /// 200 with this JSON body and the default quota.
    Body(Value),
    /// Non-2xx status.
    Status(u16),
    /// 200 with a body that is not JSON.
    Malformed,
    /// 200 with a body and an explicit quota (`None` drops the headers).
    WithQuota(Value, Option<RateQuota>),
}

pub struct ScriptedRemote {
    grid: SectorGrid,
    sectors: Mutex<HashMap<SectorNumber, ScriptedSector>>,
    documents: Mutex<HashMap<String, Value>>,
    last_modified: Mutex<HashMap<String, DateTime<Utc>>>,
    default_last_modified: Mutex<Option<DateTime<Utc>>>,
    fetched_sectors: Mutex<Vec<SectorNumber>>,
    document_fetches: AtomicUsize,
    probes: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new(grid: SectorGrid) -> Self {
        Self {
            grid,
            sectors: Mutex::new(HashMap::new()),
            documents: Mutex::new(HashMap::new()),
            last_modified: Mutex::new(HashMap::new()),
            default_last_modified: Mutex::new(None),
            fetched_sectors: Mutex::new(Vec::new()),
            document_fetches: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn default_quota() -> RateQuota {
        RateQuota::new(1000, Duration::ZERO)
    }

    pub fn script_sector(&self, sector: SectorNumber, response: ScriptedSector) {
        self.sectors.lock().unwrap().insert(sector, response);
    }

    pub fn script_systems(&self, sector: SectorNumber, systems: &[(&str, Coordinates)]) {
        let body = systems
            .iter()
            .map(|(name, c)| json!({ "name": name, "coords": { "x": c.x, "y": c.y, "z": c.z } }))
            .collect::<Vec<_>>();
        self.script_sector(sector, ScriptedSector::Body(Value::Array(body)));
    }

    pub fn script_document(&self, resource: &str, body: Value) {
        self.documents.lock().unwrap().insert(resource.to_string(), body);
    }

    pub fn script_last_modified(&self, resource: &str, when: DateTime<Utc>) {
        self.last_modified
            .lock()
            .unwrap()
            .insert(resource.to_string(), when);
    }

    /// Reported for every resource without its own timestamp.
    pub fn script_default_last_modified(&self, when: Option<DateTime<Utc>>) {
        *self.default_last_modified.lock().unwrap() = when;
    }

    pub fn fetched_sectors(&self) -> Vec<SectorNumber> {
        self.fetched_sectors.lock().unwrap().clone()
    }

    pub fn sector_fetches(&self) -> usize {
        self.fetched_sectors.lock().unwrap().len()
    }

    pub fn document_fetches(&self) -> usize {
        self.document_fetches.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl RemoteSource for ScriptedRemote {
    fn last_modified(
        &self,
        resource: &str,
    ) -> BoxFuture<'_, Result<Option<DateTime<Utc>>, SyncError>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let stamp = self
            .last_modified
            .lock()
            .unwrap()
            .get(resource)
            .copied()
            .or(*self.default_last_modified.lock().unwrap());
        Box::pin(async move { Ok(stamp) })
    }

    fn fetch_json(&self, resource: &str) -> BoxFuture<'_, Result<Value, SyncError>> {
        self.document_fetches.fetch_add(1, Ordering::SeqCst);
        let body = self.documents.lock().unwrap().get(resource).cloned();
        let resource = resource.to_string();
        Box::pin(async move { body.ok_or_else(|| SyncError::network(resource, "HTTP 404 Not Found")) })
    }

    fn fetch_sector(
        &self,
        query: SectorQuery,
    ) -> BoxFuture<'_, Result<SectorResponse, SyncError>> {
        let sector = self.grid.sector_number_for(&query.center);
        self.fetched_sectors.lock().unwrap().push(sector);
        let scripted = self
            .sectors
            .lock()
            .unwrap()
            .get(&sector)
            .cloned()
            .unwrap_or(ScriptedSector::Body(json!([])));
        let resource = query.url();

        Box::pin(async move {
            let ok = |body: Option<Value>, quota: Option<RateQuota>| SectorResponse {
                body,
                quota,
                elapsed: Duration::from_millis(10),
            };
            match scripted {
                ScriptedSector::Body(body) => Ok(ok(Some(body), Some(Self::default_quota()))),
                ScriptedSector::Status(code) => {
                    Err(SyncError::network(resource, format!("HTTP {code}")))
                }
                ScriptedSector::Malformed => Ok(ok(None, Some(Self::default_quota()))),
                ScriptedSector::WithQuota(body, quota) => Ok(ok(Some(body), quota)),
            }
        })
    }
}
