//! Bulk sync of datasets published as a single JSON file: static layers and
//! the sector catalog. Both are re-imported whole when the remote file is
//! newer than the last import.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use super::{FreshnessChecker, SyncReport};
use crate::db::{CatalogSector, Database, System};
use crate::error::SyncError;
use crate::models::Coordinates;
use crate::remote::RemoteSource;
use crate::sectors::{SectorGrid, SectorNumber};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Config key set once the sector catalog has been imported.
pub const CATALOG_READY_KEY: &str = "ready";

pub struct StaticLayerSync {
    remote: Arc<dyn RemoteSource>,
    freshness: FreshnessChecker,
    grid: SectorGrid,
}

impl StaticLayerSync {
    pub fn new(remote: Arc<dyn RemoteSource>, grid: SectorGrid) -> Self {
        Self {
            freshness: FreshnessChecker::new(remote.clone()),
            remote,
            grid,
        }
    }

    /// Re-import `file_uri` into `store` unless the stored copy is current.
    pub async fn sync_layer(
        &self,
        layer_name: &str,
        file_uri: &str,
        store: &Database,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(layer_name);
        report.checked = 1;

        if !self.freshness.is_stale(store, file_uri).await? {
            log_info!("Database for layer {layer_name} already up-to-date");
            report.up_to_date = 1;
            return Ok(report);
        }

        log_info!("Importing {file_uri} into layer {layer_name}");
        let body = self.remote.fetch_json(file_uri).await?;
        let systems = parse_static_systems(&body, &self.grid, file_uri)?;
        let import = store.replace_all_systems(systems, Utc::now()).await?;

        log_info!(
            "Layer {layer_name}: imported {} systems ({} skipped)",
            import.inserted,
            import.skipped
        );
        report.refreshed = 1;
        report.systems_written = import.inserted;
        Ok(report)
    }

    /// Re-import the named sector catalog unless the stored copy is current.
    pub async fn sync_catalog(&self, resource: &str, store: &Database) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(store.namespace());
        report.checked = 1;

        if !self.freshness.is_stale(store, resource).await? {
            log_info!("Sector catalog already up-to-date");
            report.up_to_date = 1;
            return Ok(report);
        }

        let body = self.remote.fetch_json(resource).await?;
        let sectors = parse_catalog(&body, resource)?;
        let written = store.replace_catalog(sectors, Utc::now()).await?;
        store.put_config(CATALOG_READY_KEY, "1").await?;

        log_info!("Imported {written} catalog sectors from {resource}");
        report.refreshed = 1;
        report.systems_written = written;
        Ok(report)
    }
}

fn malformed(resource: &str, reason: impl Into<String>) -> SyncError {
    SyncError::MalformedResponse {
        resource: resource.to_string(),
        reason: reason.into(),
    }
}

/// `[{x, y, z, systemName, ...}]`. Unreadable records are skipped.
fn parse_static_systems(
    body: &Value,
    grid: &SectorGrid,
    resource: &str,
) -> Result<Vec<System>, SyncError> {
    let records = body
        .as_array()
        .ok_or_else(|| malformed(resource, "expected a JSON array of systems"))?;

    let mut systems = Vec::with_capacity(records.len());
    let mut unreadable = 0usize;
    for record in records {
        match parse_static_system(record) {
            Some(system) => {
                let sector = grid.sector_number_for(&system.coords());
                systems.push(system.with_sector(sector));
            }
            None => unreadable += 1,
        }
    }
    if unreadable > 0 {
        log_warn!("{resource}: skipped {unreadable} unreadable records");
    }
    Ok(systems)
}

fn parse_static_system(record: &Value) -> Option<System> {
    let object = record.as_object()?;
    let coords = Coordinates::new(
        object.get("x")?.as_f64()?,
        object.get("y")?.as_f64()?,
        object.get("z")?.as_f64()?,
    );
    let name = object.get("systemName")?.as_str()?;

    let extra: Map<String, Value> = object
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "x" | "y" | "z" | "systemName"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let system = System::new(name, coords);
    Some(if extra.is_empty() {
        system
    } else {
        system.with_info(Value::Object(extra))
    })
}

/// Either a list of `{sector_number: [x, y, z], sectorName?}` records or an
/// object keyed by `"x,y,z"` whose values are names or such records.
fn parse_catalog(body: &Value, resource: &str) -> Result<Vec<CatalogSector>, SyncError> {
    let mut sectors = Vec::new();
    match body {
        Value::Array(records) => {
            for record in records {
                let number = record.get("sector_number").and_then(parse_sector_array);
                match number {
                    Some(sector_number) => sectors.push(CatalogSector {
                        sector_number,
                        sector_name: sector_name(record),
                    }),
                    None => log_warn!("{resource}: skipping catalog record without sector_number"),
                }
            }
        }
        Value::Object(entries) => {
            for (key, value) in entries {
                let Some(sector_number) = parse_sector_key(key) else {
                    log_warn!("{resource}: skipping catalog key '{key}'");
                    continue;
                };
                let name = match value {
                    Value::String(name) => Some(name.clone()),
                    other => sector_name(other),
                };
                sectors.push(CatalogSector {
                    sector_number,
                    sector_name: name,
                });
            }
        }
        _ => return Err(malformed(resource, "expected a sector list or map")),
    }
    Ok(sectors)
}

fn sector_name(record: &Value) -> Option<String> {
    record
        .get("sectorName")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_sector_array(value: &Value) -> Option<SectorNumber> {
    let parts = value.as_array()?;
    match parts.as_slice() {
        [x, y, z] => Some(SectorNumber::new(x.as_i64()?, y.as_i64()?, z.as_i64()?)),
        _ => None,
    }
}

fn parse_sector_key(key: &str) -> Option<SectorNumber> {
    let parts: Vec<i64> = key
        .trim_matches(|c: char| c == '[' || c == ']')
        .split(',')
        .map(|part| part.trim().parse().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [x, y, z] => Some(SectorNumber::new(*x, *y, *z)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_database;
    use crate::remote::testing::ScriptedRemote;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn syncer(remote: &Arc<ScriptedRemote>) -> StaticLayerSync {
        StaticLayerSync::new(remote.clone(), SectorGrid::default())
    }

    #[tokio::test]
    async fn static_import_round_trips_and_then_skips() {
        let remote = Arc::new(ScriptedRemote::new(SectorGrid::default()));
        remote.script_document(
            "all_systems.json",
            json!([
                { "x": 0.0, "y": 0.0, "z": 0.0, "systemName": "Sol", "allegiance": "Federation" },
                { "x": 67.5, "y": -119.46875, "z": 24.84375, "systemName": "Achenar" },
                { "systemName": "No coordinates" }
            ]),
        );
        let (_dir, db) = temp_database("ed3d_all_systems");
        let syncer = syncer(&remote);

        let report = syncer.sync_layer("all_systems", "all_systems.json", &db).await.unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.systems_written, 2);

        let stored = db.get_all_systems().await.unwrap();
        let sol = stored.iter().find(|s| s.system_name == "Sol").unwrap();
        assert_eq!(sol.coords(), Coordinates::new(0.0, 0.0, 0.0));
        assert_eq!(sol.system_info, Some(json!({ "allegiance": "Federation" })));
        assert_eq!(
            sol.sector_number,
            Some(SectorGrid::default().sector_number_for(&sol.coords()))
        );
        let achenar = stored.iter().find(|s| s.system_name == "Achenar").unwrap();
        assert_eq!(achenar.coords(), Coordinates::new(67.5, -119.46875, 24.84375));
        assert_eq!(achenar.system_info, None);

        remote.script_last_modified("all_systems.json", Utc::now() - chrono::Duration::days(1));
        let report = syncer.sync_layer("all_systems", "all_systems.json", &db).await.unwrap();
        assert_eq!(report.up_to_date, 1);
        assert_eq!(remote.document_fetches(), 1);
    }

    #[tokio::test]
    async fn unknown_last_modified_reimports() {
        let remote = Arc::new(ScriptedRemote::new(SectorGrid::default()));
        remote.script_document("nebulae.json", json!([]));
        let (_dir, db) = temp_database("ed3d_nebulae");
        let syncer = syncer(&remote);

        syncer.sync_layer("nebulae", "nebulae.json", &db).await.unwrap();
        syncer.sync_layer("nebulae", "nebulae.json", &db).await.unwrap();
        assert_eq!(remote.document_fetches(), 2);
    }

    #[tokio::test]
    async fn non_array_dataset_is_rejected_and_keeps_old_data() {
        let remote = Arc::new(ScriptedRemote::new(SectorGrid::default()));
        remote.script_document("broken.json", json!({ "systems": [] }));
        let (_dir, db) = temp_database("ed3d_broken");
        db.put_system(System::new("Kept", Coordinates::new(1.0, 1.0, 1.0)))
            .await
            .unwrap();

        let err = syncer(&remote)
            .sync_layer("broken", "broken.json", &db)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse { .. }));
        assert_eq!(db.count_systems().await.unwrap(), 1);
        assert_eq!(db.import_date().await.unwrap(), None);
    }

    #[tokio::test]
    async fn catalog_import_is_skipped_when_fresh() {
        let remote = Arc::new(ScriptedRemote::new(SectorGrid::default()));
        remote.script_document(
            "sectors.json",
            json!([
                { "sector_number": [39, 32, 18], "sectorName": "Sol" },
                { "sector_number": [40, 32, 18] },
                { "sectorName": "Orphan" }
            ]),
        );
        let (_dir, db) = temp_database("ed3d_sectors");
        let syncer = syncer(&remote);

        let report = syncer.sync_catalog("sectors.json", &db).await.unwrap();
        assert_eq!(report.systems_written, 2);
        assert_eq!(
            db.get_catalog_sector(SectorNumber::new(39, 32, 18))
                .await
                .unwrap()
                .and_then(|s| s.sector_name),
            Some("Sol".to_string())
        );
        assert_eq!(db.get_config(CATALOG_READY_KEY).await.unwrap(), Some("1".into()));

        remote.script_last_modified("sectors.json", Utc::now() - chrono::Duration::hours(1));
        let report = syncer.sync_catalog("sectors.json", &db).await.unwrap();
        assert_eq!(report.up_to_date, 1);
        assert_eq!(remote.document_fetches(), 1);
    }

    #[test]
    fn catalog_map_keys() {
        let body = json!({ "[1, 2, 3]": "Alpha", "4,5,6": { "sectorName": "Beta" }, "nope": "x" });
        let mut sectors = parse_catalog(&body, "sectors.json").unwrap();
        sectors.sort_by_key(|s| s.sector_number);
        assert_eq!(
            sectors,
            vec![
                CatalogSector {
                    sector_number: SectorNumber::new(1, 2, 3),
                    sector_name: Some("Alpha".into()),
                },
                CatalogSector {
                    sector_number: SectorNumber::new(4, 5, 6),
                    sector_name: Some("Beta".into()),
                },
            ]
        );
    }
}
