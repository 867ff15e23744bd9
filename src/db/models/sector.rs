use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sectors::SectorNumber;

/// Freshness bookkeeping for one sector of a remote layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorRecord {
    pub sector_number: SectorNumber,
    /// Last time the sector's systems were confirmed against the remote.
    pub updated_date: Option<DateTime<Utc>>,
    /// Last time a render request read this sector.
    pub last_loaded_date: Option<DateTime<Utc>>,
}

impl SectorRecord {
    pub fn new(sector_number: SectorNumber) -> Self {
        Self {
            sector_number,
            updated_date: None,
            last_loaded_date: None,
        }
    }
}

/// Entry of the named sector catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSector {
    pub sector_number: SectorNumber,
    pub sector_name: Option<String>,
}
