pub mod sector;
pub mod system;

pub use sector::{CatalogSector, SectorRecord};
pub use system::{ImportReport, System};

/// Config key holding the RFC 3339 time of the last successful bulk import.
pub const IMPORT_DATE_KEY: &str = "importDate";
