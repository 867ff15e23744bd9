use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    helpers::{conversion_error, format_datetime, parse_optional_datetime},
    models::SectorRecord,
    Database,
};
use crate::sectors::SectorNumber;

fn row_to_sector_record(row: &Row) -> Result<SectorRecord, rusqlite::Error> {
    let updated_date: Option<String> = row.get("updated_date")?;
    let last_loaded_date: Option<String> = row.get("last_loaded_date")?;

    Ok(SectorRecord {
        sector_number: SectorNumber::new(
            row.get("sector_x")?,
            row.get("sector_y")?,
            row.get("sector_z")?,
        ),
        updated_date: parse_optional_datetime(updated_date, "updated_date")
            .map_err(conversion_error)?,
        last_loaded_date: parse_optional_datetime(last_loaded_date, "last_loaded_date")
            .map_err(conversion_error)?,
    })
}

impl Database {
    pub async fn get_sector_record(&self, sector: SectorNumber) -> Result<Option<SectorRecord>> {
        self.execute(move |conn| {
            let record = conn
                .query_row(
                    "SELECT sector_x, sector_y, sector_z, updated_date, last_loaded_date
                     FROM sectors
                     WHERE sector_x = ?1 AND sector_y = ?2 AND sector_z = ?3",
                    params![sector.x(), sector.y(), sector.z()],
                    row_to_sector_record,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    pub async fn put_sector_record(&self, record: SectorRecord) -> Result<()> {
        self.execute(move |conn| {
            let sector = record.sector_number;
            conn.execute(
                "INSERT INTO sectors (sector_x, sector_y, sector_z, updated_date, last_loaded_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(sector_x, sector_y, sector_z) DO UPDATE SET
                     updated_date = excluded.updated_date,
                     last_loaded_date = excluded.last_loaded_date",
                params![
                    sector.x(),
                    sector.y(),
                    sector.z(),
                    record.updated_date.as_ref().map(format_datetime),
                    record.last_loaded_date.as_ref().map(format_datetime),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Mark a sector as just viewed, creating its record on first sight.
    /// Returns the record as it was before this call (`None` if new).
    pub async fn touch_sector(
        &self,
        sector: SectorNumber,
        now: DateTime<Utc>,
    ) -> Result<Option<SectorRecord>> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let previous = tx
                .query_row(
                    "SELECT sector_x, sector_y, sector_z, updated_date, last_loaded_date
                     FROM sectors
                     WHERE sector_x = ?1 AND sector_y = ?2 AND sector_z = ?3",
                    params![sector.x(), sector.y(), sector.z()],
                    row_to_sector_record,
                )
                .optional()?;
            tx.execute(
                "INSERT INTO sectors (sector_x, sector_y, sector_z, last_loaded_date)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(sector_x, sector_y, sector_z) DO UPDATE SET
                     last_loaded_date = excluded.last_loaded_date",
                params![sector.x(), sector.y(), sector.z(), format_datetime(&now)],
            )?;
            tx.commit()?;
            Ok(previous)
        })
        .await
    }

    /// All sector records, most recently viewed first.
    pub async fn sector_records_by_recency(&self) -> Result<Vec<SectorRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sector_x, sector_y, sector_z, updated_date, last_loaded_date
                 FROM sectors
                 ORDER BY last_loaded_date IS NULL, last_loaded_date DESC",
            )?;
            let records = stmt
                .query_map([], row_to_sector_record)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }
}
