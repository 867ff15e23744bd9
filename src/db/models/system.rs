//! Star system record.
//!
//! Static and remote layers store the same shape in separate namespaces.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Coordinates;
use crate::sectors::SectorNumber;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct System {
    pub id: Option<i64>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Denormalised from the coordinates so sectors can be range-queried.
    pub sector_number: Option<SectorNumber>,
    pub system_name: String,
    /// Every source field other than name and coordinates.
    pub system_info: Option<Value>,
}

impl System {
    pub fn new(system_name: impl Into<String>, coords: Coordinates) -> Self {
        Self {
            id: None,
            x: coords.x,
            y: coords.y,
            z: coords.z,
            sector_number: None,
            system_name: system_name.into(),
            system_info: None,
        }
    }

    pub fn with_sector(mut self, sector: SectorNumber) -> Self {
        self.sector_number = Some(sector);
        self
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.system_info = Some(info);
        self
    }

    pub fn coords(&self) -> Coordinates {
        Coordinates::new(self.x, self.y, self.z)
    }
}

/// Outcome of a batch write. Rejected records are skipped, not fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub inserted: usize,
    pub skipped: usize,
}
