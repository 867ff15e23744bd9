use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::{
    helpers::format_datetime,
    models::{CatalogSector, IMPORT_DATE_KEY},
    Database,
};
use crate::sectors::SectorNumber;

impl Database {
    /// Replace the named sector catalog and record the import time.
    pub async fn replace_catalog(
        &self,
        sectors: Vec<CatalogSector>,
        import_date: DateTime<Utc>,
    ) -> Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM sector_catalog", [])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO sector_catalog (sector_x, sector_y, sector_z, sector_name)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(sector_x, sector_y, sector_z) DO UPDATE SET
                         sector_name = COALESCE(excluded.sector_name, sector_catalog.sector_name)",
                )?;
                for entry in &sectors {
                    let n = entry.sector_number;
                    stmt.execute(params![n.x(), n.y(), n.z(), entry.sector_name])?;
                }
            }
            tx.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![IMPORT_DATE_KEY, format_datetime(&import_date)],
            )?;
            tx.commit().context("failed to commit sector catalog")?;
            Ok(sectors.len())
        })
        .await
    }

    pub async fn get_catalog_sector(&self, sector: SectorNumber) -> Result<Option<CatalogSector>> {
        self.execute(move |conn| {
            let name = conn
                .query_row(
                    "SELECT sector_name FROM sector_catalog
                     WHERE sector_x = ?1 AND sector_y = ?2 AND sector_z = ?3",
                    params![sector.x(), sector.y(), sector.z()],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?;
            Ok(name.map(|sector_name| CatalogSector {
                sector_number: sector,
                sector_name,
            }))
        })
        .await
    }
}
