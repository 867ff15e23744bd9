use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
    time::Duration,
};

use crate::models::{default_layers, Layer};
use crate::remote::RATE_LIMIT_ABORT_THRESHOLD;
use crate::sectors::SectorGrid;
use crate::sync::{CachePolicy, SyncOptions, DEFAULT_FETCH_PARALLELISM, DEFAULT_MAX_RADIUS};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub const SETTINGS_FILE: &str = "settings.json";
pub const DATA_DIR_ENV: &str = "ED3D_DATA_DIR";
pub const BASE_URL_ENV: &str = "ED3D_BASE_URL";

const DEFAULT_DATA_DIR: &str = ".ed3d";
const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 15 * 60;

/// Ceiling on `max_radius`, in sectors of the configured grid.
const MAX_RADIUS_IN_SECTORS: f64 = 16.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Where static layer files and `sectors.json` are published.
    pub base_url: String,
    pub grid: SectorGrid,
    pub max_radius: f64,
    pub fetch_parallelism: usize,
    pub rate_limit_threshold_secs: u64,
    pub cache_policy: CachePolicy,
    pub refetch_empty_sectors: bool,
    pub resync_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            grid: SectorGrid::default(),
            max_radius: DEFAULT_MAX_RADIUS,
            fetch_parallelism: DEFAULT_FETCH_PARALLELISM,
            rate_limit_threshold_secs: RATE_LIMIT_ABORT_THRESHOLD.as_secs(),
            cache_policy: CachePolicy::default(),
            refetch_empty_sectors: false,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
        }
    }
}

impl SyncSettings {
    /// Engine options. A grid or radius the engine cannot enumerate falls
    /// back to the default with a warning.
    pub fn to_options(&self) -> SyncOptions {
        let grid = if self.grid.is_valid() {
            self.grid
        } else {
            log_warn!("Unusable sector grid {:?}; using the default grid", self.grid);
            SectorGrid::default()
        };

        let radius_ceiling = grid.sector_size * MAX_RADIUS_IN_SECTORS;
        let max_radius = if self.max_radius.is_finite()
            && (0.0..=radius_ceiling).contains(&self.max_radius)
        {
            self.max_radius
        } else {
            let fallback = DEFAULT_MAX_RADIUS.min(radius_ceiling);
            log_warn!(
                "maxRadius {} outside 0..={radius_ceiling}; using {fallback}",
                self.max_radius
            );
            fallback
        };

        SyncOptions {
            grid,
            max_radius,
            fetch_parallelism: self.fetch_parallelism.max(1),
            rate_limit_threshold: Duration::from_secs(self.rate_limit_threshold_secs),
            cache_policy: self.cache_policy,
            refetch_empty_sectors: self.refetch_empty_sectors,
        }
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserSettings {
    sync: SyncSettings,
    layers: Vec<Layer>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            sync: SyncSettings::default(),
            layers: default_layers(),
        }
    }
}

/// `ED3D_DATA_DIR`, else `.ed3d` in the working directory.
pub fn default_data_dir() -> PathBuf {
    env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
    base_url_override: Option<String>,
}

impl SettingsStore {
    /// Settings file inside `data_dir`, with environment overrides applied.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let mut store = Self::new(data_dir.join(SETTINGS_FILE))?;
        store.base_url_override = env::var(BASE_URL_ENV).ok().filter(|url| !url.is_empty());
        Ok(store)
    }

    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log_warn!("Ignoring unreadable settings in {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
            base_url_override: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sync(&self) -> SyncSettings {
        let mut settings = self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sync
            .clone();
        if let Some(url) = &self.base_url_override {
            settings.base_url = url.clone();
        }
        settings
    }

    pub fn layers(&self) -> Vec<Layer> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .layers
            .clone()
    }

    /// Edit the stored sync settings and persist them. Environment overrides
    /// are not written back.
    pub fn update_sync(&self, edit: impl FnOnce(&mut SyncSettings)) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        edit(&mut guard.sync);
        self.persist(&guard)
    }

    pub fn update_layers(&self, edit: impl FnOnce(&mut Vec<Layer>)) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        edit(&mut guard.layers);
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
