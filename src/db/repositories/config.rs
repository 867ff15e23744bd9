use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::{
    helpers::{format_datetime, parse_datetime},
    models::IMPORT_DATE_KEY,
    Database,
};

impl Database {
    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM config WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    pub async fn put_config(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    /// Time of the last successful bulk import into this namespace.
    pub async fn import_date(&self) -> Result<Option<DateTime<Utc>>> {
        match self.get_config(IMPORT_DATE_KEY).await? {
            Some(raw) => parse_datetime(&raw, IMPORT_DATE_KEY).map(Some),
            None => Ok(None),
        }
    }

    pub async fn set_import_date(&self, when: DateTime<Utc>) -> Result<()> {
        self.put_config(IMPORT_DATE_KEY, &format_datetime(&when)).await
    }
}
