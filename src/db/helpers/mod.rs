use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;

use crate::sectors::SectorNumber;

/// Fixed-width UTC form so stored timestamps sort lexically in time order.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

/// Wrap a non-SQLite failure so it can leave a `query_map` row callback.
pub fn conversion_error(err: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}

pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Read the `sector_x/y/z` column triple; all three null means no sector.
pub fn sector_from_row(row: &Row) -> Result<Option<SectorNumber>, rusqlite::Error> {
    let x: Option<i64> = row.get("sector_x")?;
    let y: Option<i64> = row.get("sector_y")?;
    let z: Option<i64> = row.get("sector_z")?;
    Ok(match (x, y, z) {
        (Some(x), Some(y), Some(z)) => Some(SectorNumber::new(x, y, z)),
        _ => None,
    })
}
