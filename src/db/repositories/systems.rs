use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    helpers::{conversion_error, format_datetime, is_constraint_violation, sector_from_row},
    models::{ImportReport, System, IMPORT_DATE_KEY},
    Database,
};
use crate::models::{BoundingBox, Coordinates};
use crate::sectors::SectorNumber;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

const SYSTEM_COLUMNS: &str =
    "id, x, y, z, sector_x, sector_y, sector_z, system_name, system_info";

fn row_to_system(row: &Row) -> Result<System, rusqlite::Error> {
    let system_info: Option<String> = row.get("system_info")?;

    Ok(System {
        id: Some(row.get("id")?),
        x: row.get("x")?,
        y: row.get("y")?,
        z: row.get("z")?,
        sector_number: sector_from_row(row)?,
        system_name: row.get("system_name")?,
        system_info: system_info
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(conversion_error)?,
    })
}

fn insert_system(conn: &Connection, system: &System) -> Result<i64, rusqlite::Error> {
    let system_info = system
        .system_info
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(conversion_error)?;
    let sector = system.sector_number;

    conn.execute(
        "INSERT INTO systems (x, y, z, sector_x, sector_y, sector_z, system_name, system_info)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            system.x,
            system.y,
            system.z,
            sector.map(|s| s.x()),
            sector.map(|s| s.y()),
            sector.map(|s| s.z()),
            system.system_name,
            system_info,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert every system, skipping (and counting) records the schema rejects
/// such as a second system at an already-stored coordinate. Any other
/// failure aborts the batch.
pub(crate) fn insert_batch(
    conn: &Connection,
    namespace: &str,
    systems: &[System],
) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    for system in systems {
        match insert_system(conn, system) {
            Ok(_) => report.inserted += 1,
            Err(err) if is_constraint_violation(&err) => {
                log_warn!(
                    "[{namespace}] skipping system {} at {}: {err}",
                    system.system_name,
                    system.coords()
                );
                report.skipped += 1;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to insert system {}", system.system_name)
                })
            }
        }
    }
    Ok(report)
}

impl Database {
    pub async fn get_systems_in_sector(&self, sector: SectorNumber) -> Result<Vec<System>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SYSTEM_COLUMNS}
                 FROM systems
                 WHERE sector_x = ?1 AND sector_y = ?2 AND sector_z = ?3"
            ))?;

            let systems = stmt
                .query_map(params![sector.x(), sector.y(), sector.z()], row_to_system)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(systems)
        })
        .await
    }

    pub async fn get_all_systems(&self) -> Result<Vec<System>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT {SYSTEM_COLUMNS} FROM systems ORDER BY id ASC"))?;
            let systems = stmt
                .query_map([], row_to_system)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(systems)
        })
        .await
    }

    /// Insert one system and return its row id.
    pub async fn put_system(&self, system: System) -> Result<i64> {
        self.execute(move |conn| {
            insert_system(conn, &system)
                .with_context(|| format!("failed to insert system {}", system.system_name))
        })
        .await
    }

    pub async fn delete_systems_in_sector(&self, sector: SectorNumber) -> Result<usize> {
        self.execute(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM systems WHERE sector_x = ?1 AND sector_y = ?2 AND sector_z = ?3",
                params![sector.x(), sector.y(), sector.z()],
            )?;
            Ok(deleted)
        })
        .await
    }

    /// Replace a sector's systems and stamp it fresh as one transaction, so
    /// readers see either the old contents or the new, never an empty sector.
    pub async fn replace_sector_systems(
        &self,
        sector: SectorNumber,
        systems: Vec<System>,
        updated_date: DateTime<Utc>,
    ) -> Result<ImportReport> {
        let namespace = self.namespace().to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM systems WHERE sector_x = ?1 AND sector_y = ?2 AND sector_z = ?3",
                params![sector.x(), sector.y(), sector.z()],
            )?;

            let stamped: Vec<System> = systems
                .into_iter()
                .map(|system| system.with_sector(sector))
                .collect();
            let report = insert_batch(&tx, &namespace, &stamped)?;

            tx.execute(
                "INSERT INTO sectors (sector_x, sector_y, sector_z, updated_date)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(sector_x, sector_y, sector_z) DO UPDATE SET
                     updated_date = excluded.updated_date",
                params![
                    sector.x(),
                    sector.y(),
                    sector.z(),
                    format_datetime(&updated_date),
                ],
            )?;

            tx.commit()
                .with_context(|| format!("failed to commit sector {sector}"))?;
            Ok(report)
        })
        .await
    }

    /// Swap the whole dataset of a static layer and record the import time.
    pub async fn replace_all_systems(
        &self,
        systems: Vec<System>,
        import_date: DateTime<Utc>,
    ) -> Result<ImportReport> {
        let namespace = self.namespace().to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM systems", [])?;
            let report = insert_batch(&tx, &namespace, &systems)?;
            tx.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![IMPORT_DATE_KEY, format_datetime(&import_date)],
            )?;
            tx.commit().context("failed to commit dataset import")?;
            Ok(report)
        })
        .await
    }

    pub async fn find_system_at(&self, coords: Coordinates) -> Result<Option<System>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SYSTEM_COLUMNS} FROM systems WHERE x = ?1 AND y = ?2 AND z = ?3"
            ))?;
            let system = stmt
                .query_row(params![coords.x, coords.y, coords.z], row_to_system)
                .optional()?;
            Ok(system)
        })
        .await
    }

    /// Coordinates of every system inside `bounds` (min inclusive, max exclusive).
    pub async fn coordinates_within(&self, bounds: BoundingBox) -> Result<Vec<Coordinates>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT x, y, z FROM systems
                 WHERE x >= ?1 AND x < ?2
                   AND y >= ?3 AND y < ?4
                   AND z >= ?5 AND z < ?6",
            )?;
            let coords = stmt
                .query_map(
                    params![
                        bounds.min.x,
                        bounds.max.x,
                        bounds.min.y,
                        bounds.max.y,
                        bounds.min.z,
                        bounds.max.z,
                    ],
                    |row| Ok(Coordinates::new(row.get(0)?, row.get(1)?, row.get(2)?)),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(coords)
        })
        .await
    }

    /// Box spanning every stored system, or `None` when the store is empty.
    pub async fn system_extent(&self) -> Result<Option<BoundingBox>> {
        self.execute(move |conn| {
            let extent = conn.query_row(
                "SELECT MIN(x), MIN(y), MIN(z), MAX(x), MAX(y), MAX(z) FROM systems",
                [],
                |row| {
                    let min: (Option<f64>, Option<f64>, Option<f64>) =
                        (row.get(0)?, row.get(1)?, row.get(2)?);
                    let max: (Option<f64>, Option<f64>, Option<f64>) =
                        (row.get(3)?, row.get(4)?, row.get(5)?);
                    Ok(match (min, max) {
                        ((Some(ax), Some(ay), Some(az)), (Some(bx), Some(by), Some(bz))) => {
                            Some(BoundingBox::new(
                                Coordinates::new(ax, ay, az),
                                Coordinates::new(bx, by, bz),
                            ))
                        }
                        _ => None,
                    })
                },
            )?;
            Ok(extent)
        })
        .await
    }

    pub async fn count_systems(&self) -> Result<usize> {
        self.execute(move |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM systems", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }
}
