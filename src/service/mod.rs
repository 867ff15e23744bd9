//! Layer data service: what the map viewer and its layer list talk to.
//!
//! Owns one store per layer plus the sector catalog, the sync machinery,
//! and the set of layers currently switched on.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::db::{Database, System};
use crate::models::{BoundingSphere, Coordinates, Layer, LayerKind, RenderPoint};
use crate::remote::RemoteSource;
use crate::sectors::SectorNumber;
use crate::sync::{
    RegionResult, RemoteLayer, SectorSyncEngine, StaticLayerSync, SyncOptions, SyncReport,
};

pub mod background;

pub use background::BackgroundSync;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const SECTOR_CATALOG_NAMESPACE: &str = "ed3d_sectors";
pub const SECTOR_CATALOG_RESOURCE: &str = "sectors.json";

/// Details of one system for the info panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub layer: String,
    pub system_name: String,
    pub position: Coordinates,
    pub sector_number: SectorNumber,
    pub sector_name: Option<String>,
    pub system_info: Option<Value>,
}

#[derive(Debug, Default)]
struct LayerState {
    /// In the order they were switched on.
    active: Vec<String>,
    loaded: HashSet<String>,
}

pub struct LayerDataService {
    layers: Vec<Layer>,
    stores: HashMap<String, Database>,
    static_stores: Vec<Database>,
    catalog: Database,
    engine: SectorSyncEngine,
    bulk: StaticLayerSync,
    state: RwLock<LayerState>,
}

impl LayerDataService {
    /// Open a store for every layer and the sector catalog under `data_dir`.
    pub fn open(
        data_dir: &Path,
        layers: Vec<Layer>,
        remote: Arc<dyn RemoteSource>,
        options: SyncOptions,
    ) -> Result<Self> {
        let mut stores = HashMap::new();
        let mut static_stores = Vec::new();
        for layer in &layers {
            if stores.contains_key(&layer.name) {
                bail!("duplicate layer name: {}", layer.name);
            }
            if layer.namespace() == SECTOR_CATALOG_NAMESPACE {
                bail!("layer name {} is reserved for the sector catalog", layer.name);
            }
            let store = Database::open(data_dir, &layer.namespace())
                .with_context(|| format!("failed to open store for layer {}", layer.name))?;
            if layer.is_static() {
                static_stores.push(store.clone());
            }
            stores.insert(layer.name.clone(), store);
        }

        let catalog = Database::open(data_dir, SECTOR_CATALOG_NAMESPACE)
            .context("failed to open sector catalog")?;

        let state = LayerState {
            active: layers
                .iter()
                .filter(|layer| layer.default_on)
                .map(|layer| layer.name.clone())
                .collect(),
            loaded: HashSet::new(),
        };

        Ok(Self {
            bulk: StaticLayerSync::new(remote.clone(), options.grid),
            engine: SectorSyncEngine::new(remote, options),
            layers,
            stores,
            static_stores,
            catalog,
            state: RwLock::new(state),
        })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Result<&Layer> {
        match self.layers.iter().find(|layer| layer.name == name) {
            Some(layer) => Ok(layer),
            None => bail!("unknown layer: {name}"),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        self.engine.options()
    }

    fn store(&self, name: &str) -> Result<&Database> {
        self.stores
            .get(name)
            .with_context(|| format!("no store for layer {name}"))
    }

    /// Bring a layer's store up to date with its source.
    pub async fn sync_layer(&self, name: &str) -> Result<SyncReport> {
        let layer = self.layer(name)?;
        let store = self.store(name)?;
        let report = match &layer.kind {
            LayerKind::Static { file_uri } => {
                self.bulk.sync_layer(&layer.name, file_uri, store).await?
            }
            LayerKind::Remote { .. } => {
                let target = self.remote_target(layer, store)?;
                self.engine.sync_namespace(&target).await?
            }
        };
        Ok(report)
    }

    fn remote_target<'a>(&'a self, layer: &'a Layer, store: &'a Database) -> Result<RemoteLayer<'a>> {
        RemoteLayer::new(layer, store, &self.static_stores)
            .with_context(|| format!("layer {} is not a remote layer", layer.name))
    }

    /// Points of one layer around `region`. Static layers return their whole
    /// dataset; remote layers return the sectors covering the region.
    pub async fn get_layer(&self, name: &str, region: &BoundingSphere) -> Result<Vec<RenderPoint>> {
        let layer = self.layer(name)?;
        let systems = self.layer_systems(layer, region).await?;
        self.mark_loaded(name);
        Ok(to_points(layer, &systems))
    }

    async fn layer_systems(&self, layer: &Layer, region: &BoundingSphere) -> Result<Vec<System>> {
        let store = self.store(&layer.name)?;
        match &layer.kind {
            LayerKind::Static { .. } => store.get_all_systems().await,
            LayerKind::Remote { .. } => {
                let target = self.remote_target(layer, store)?;
                let RegionResult {
                    systems,
                    failed_sectors,
                    aborted,
                    ..
                } = self.engine.resolve_region(&target, region).await;
                if !failed_sectors.is_empty() {
                    log_warn!(
                        "Layer {}: {} sectors could not be loaded",
                        layer.name,
                        failed_sectors.len()
                    );
                }
                if aborted {
                    log_warn!("Layer {}: region incomplete, remote quota exhausted", layer.name);
                }
                Ok(systems)
            }
        }
    }

    /// Every active layer merged into one point set. Static layers come
    /// first, so a coordinate they cover is never drawn twice.
    pub async fn get_layers(&self, region: &BoundingSphere) -> Result<Vec<RenderPoint>> {
        let mut seen = HashSet::new();
        let mut points = Vec::new();
        for layer in self.active_in_merge_order() {
            let layer_points = match self.get_layer(&layer.name, region).await {
                Ok(points) => points,
                Err(err) => {
                    log_error!("Failed to load layer {}: {err:#}", layer.name);
                    continue;
                }
            };
            points.extend(
                layer_points
                    .into_iter()
                    .filter(|point| seen.insert(point.position.key())),
            );
        }
        Ok(points)
    }

    fn active_in_merge_order(&self) -> Vec<&Layer> {
        let active = self.active_layers();
        let mut ordered: Vec<&Layer> = active
            .iter()
            .filter_map(|name| self.layers.iter().find(|layer| &layer.name == name))
            .collect();
        ordered.sort_by_key(|layer| !layer.is_static());
        ordered
    }

    /// Switch a layer on or off. Returns whether anything changed.
    pub fn layer_toggle(&self, name: &str, on: bool) -> Result<bool> {
        self.layer(name)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let is_on = state.active.iter().any(|active| active == name);
        match (on, is_on) {
            (true, false) => state.active.push(name.to_string()),
            (false, true) => state.active.retain(|active| active != name),
            (true, true) => {
                log_warn!("Layer {name} is already on");
                return Ok(false);
            }
            (false, false) => {
                log_warn!("Layer {name} is already off");
                return Ok(false);
            }
        }
        log_info!("Layer {name} switched {}", if on { "on" } else { "off" });
        Ok(true)
    }

    pub fn active_layers(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .clone()
    }

    /// Layers that have been drawn at least once, in definition order.
    pub fn loaded_layers(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        self.layers
            .iter()
            .filter(|layer| state.loaded.contains(&layer.name))
            .map(|layer| layer.name.clone())
            .collect()
    }

    fn mark_loaded(&self, name: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.loaded.insert(name.to_string());
    }

    /// Sphere framing everything stored for a layer, `None` while it is empty.
    pub async fn layer_zoom(&self, name: &str) -> Result<Option<BoundingSphere>> {
        self.layer(name)?;
        let extent = self.store(name)?.system_extent().await?;
        Ok(extent.map(|bounds| bounds.enclosing_sphere()))
    }

    /// The system at exactly `coords` in the first active layer holding one.
    pub async fn get_system_at(&self, coords: Coordinates) -> Result<Option<SystemInfo>> {
        for layer in self.active_in_merge_order() {
            let Some(system) = self.store(&layer.name)?.find_system_at(coords).await? else {
                continue;
            };
            let sector_number = system
                .sector_number
                .unwrap_or_else(|| self.options().grid.sector_number_for(&coords));
            let sector_name = self
                .catalog
                .get_catalog_sector(sector_number)
                .await?
                .and_then(|entry| entry.sector_name);
            return Ok(Some(SystemInfo {
                layer: layer.name.clone(),
                system_name: system.system_name,
                position: coords,
                sector_number,
                sector_name,
                system_info: system.system_info,
            }));
        }
        Ok(None)
    }

    /// Refresh the named sector catalog from `sectors.json`.
    pub async fn sync_sector_catalog(&self) -> Result<SyncReport> {
        Ok(self
            .bulk
            .sync_catalog(SECTOR_CATALOG_RESOURCE, &self.catalog)
            .await?)
    }

    /// Names of the layers fetched sector by sector.
    pub fn remote_layer_names(&self) -> Vec<String> {
        self.layers
            .iter()
            .filter(|layer| !layer.is_static())
            .map(|layer| layer.name.clone())
            .collect()
    }

    /// Drop everything cached for a layer; it is refetched on next use.
    pub async fn reset_layer(&self, name: &str) -> Result<()> {
        self.layer(name)?;
        self.store(name)?.clear_all().await?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.loaded.remove(name);
        log_info!("Layer {name} reset");
        Ok(())
    }

    pub async fn reset_sector_catalog(&self) -> Result<()> {
        self.catalog.clear_all().await
    }
}

fn to_points(layer: &Layer, systems: &[System]) -> Vec<RenderPoint> {
    let color = layer.point_color();
    systems
        .iter()
        .map(|system| RenderPoint {
            position: system.coords(),
            color,
            source_tag: layer.name.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Color;
    use crate::remote::testing::ScriptedRemote;
    use crate::sectors::SectorGrid;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        remote: Arc<ScriptedRemote>,
        service: LayerDataService,
    }

    fn layers() -> Vec<Layer> {
        vec![
            Layer::new_static("all_systems", "All systems", "all_systems.json")
                .with_default_on(true)
                .with_color(Color::new(0.2, 0.4, 0.8)),
            Layer::new_remote("edsm", "EDSM", "http://cube.test/api-v1/cube-systems"),
        ]
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(ScriptedRemote::new(SectorGrid::default()));
        let service =
            LayerDataService::open(dir.path(), layers(), remote.clone(), SyncOptions::default())
                .unwrap();
        Fixture {
            _dir: dir,
            remote,
            service,
        }
    }

    fn sol_region() -> BoundingSphere {
        BoundingSphere::new(Coordinates::new(0.0, 0.0, 0.0), 20.0)
    }

    #[test]
    fn duplicate_layer_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(ScriptedRemote::new(SectorGrid::default()));
        let mut layers = layers();
        layers.push(Layer::new_static("edsm", "Clash", "clash.json"));
        assert!(LayerDataService::open(dir.path(), layers, remote, SyncOptions::default()).is_err());
    }

    #[test]
    fn toggling_tracks_active_layers() {
        let f = fixture();
        assert_eq!(f.service.active_layers(), vec!["all_systems"]);

        assert!(f.service.layer_toggle("edsm", true).unwrap());
        assert!(!f.service.layer_toggle("edsm", true).unwrap());
        assert_eq!(f.service.active_layers(), vec!["all_systems", "edsm"]);

        assert!(f.service.layer_toggle("all_systems", false).unwrap());
        assert!(!f.service.layer_toggle("all_systems", false).unwrap());
        assert_eq!(f.service.active_layers(), vec!["edsm"]);

        assert!(f.service.layer_toggle("missing", true).is_err());
    }

    #[tokio::test]
    async fn merged_layers_prefer_static_points() {
        let f = fixture();
        f.remote.script_document(
            "all_systems.json",
            json!([
                { "x": 0.0, "y": 0.0, "z": 0.0, "systemName": "Sol" },
                { "x": 3.03125, "y": -0.09375, "z": 3.15625, "systemName": "Alpha Centauri" }
            ]),
        );
        let sol_sector = SectorGrid::default().sector_number_for(&Coordinates::new(0.0, 0.0, 0.0));
        f.remote.script_systems(
            sol_sector,
            &[
                ("Sol", Coordinates::new(0.0, 0.0, 0.0)),
                ("Barnard's Star", Coordinates::new(-3.03125, 1.375, 4.9375)),
            ],
        );

        f.service.sync_layer("all_systems").await.unwrap();
        f.service.layer_toggle("edsm", true).unwrap();
        let points = f.service.get_layers(&sol_region()).await.unwrap();

        let mut tagged: Vec<(String, String)> = points
            .iter()
            .map(|p| (p.source_tag.clone(), p.position.to_string()))
            .collect();
        tagged.sort();
        assert_eq!(
            tagged,
            vec![
                ("all_systems".to_string(), "(0, 0, 0)".to_string()),
                ("all_systems".to_string(), "(3.03125, -0.09375, 3.15625)".to_string()),
                ("edsm".to_string(), "(-3.03125, 1.375, 4.9375)".to_string()),
            ]
        );
        let static_point = points.iter().find(|p| p.source_tag == "all_systems").unwrap();
        assert_eq!(static_point.color, Color::new(0.2, 0.4, 0.8));
        let remote_point = points.iter().find(|p| p.source_tag == "edsm").unwrap();
        assert_eq!(remote_point.color, Color::gray(0.7));

        assert_eq!(f.service.loaded_layers(), vec!["all_systems", "edsm"]);
    }

    #[tokio::test]
    async fn system_lookup_includes_catalog_name() {
        let f = fixture();
        let sol = Coordinates::new(0.0, 0.0, 0.0);
        let sol_sector = SectorGrid::default().sector_number_for(&sol);
        f.remote.script_document(
            "all_systems.json",
            json!([{ "x": 0.0, "y": 0.0, "z": 0.0, "systemName": "Sol", "population": 22780919531u64 }]),
        );
        f.remote.script_document(
            SECTOR_CATALOG_RESOURCE,
            json!([{ "sector_number": [sol_sector.x(), sol_sector.y(), sol_sector.z()], "sectorName": "Sol Sector" }]),
        );

        f.service.sync_layer("all_systems").await.unwrap();
        f.service.sync_sector_catalog().await.unwrap();

        let info = f.service.get_system_at(sol).await.unwrap().unwrap();
        assert_eq!(
            info,
            SystemInfo {
                layer: "all_systems".into(),
                system_name: "Sol".into(),
                position: sol,
                sector_number: sol_sector,
                sector_name: Some("Sol Sector".into()),
                system_info: Some(json!({ "population": 22780919531u64 })),
            }
        );

        assert_eq!(
            f.service.get_system_at(Coordinates::new(1.0, 1.0, 1.0)).await.unwrap(),
            None
        );
        f.service.layer_toggle("all_systems", false).unwrap();
        assert_eq!(f.service.get_system_at(sol).await.unwrap(), None);
    }

    #[tokio::test]
    async fn zoom_frames_stored_systems() {
        let f = fixture();
        assert_eq!(f.service.layer_zoom("all_systems").await.unwrap(), None);

        f.remote.script_document(
            "all_systems.json",
            json!([
                { "x": -10.0, "y": 0.0, "z": 0.0, "systemName": "West" },
                { "x": 10.0, "y": 0.0, "z": 0.0, "systemName": "East" }
            ]),
        );
        f.service.sync_layer("all_systems").await.unwrap();

        let sphere = f.service.layer_zoom("all_systems").await.unwrap().unwrap();
        assert_eq!(sphere.center, Coordinates::new(0.0, 0.0, 0.0));
        assert_eq!(sphere.radius, 10.0);
    }

    #[tokio::test]
    async fn reset_forces_refetch() {
        let f = fixture();
        f.service.get_layer("edsm", &sol_region()).await.unwrap();
        let fetches = f.remote.sector_fetches();
        assert!(fetches > 0);

        f.service.get_layer("edsm", &sol_region()).await.unwrap();
        assert_eq!(f.remote.sector_fetches(), fetches);

        f.service.reset_layer("edsm").await.unwrap();
        assert!(f.service.loaded_layers().is_empty());
        f.service.get_layer("edsm", &sol_region()).await.unwrap();
        assert_eq!(f.remote.sector_fetches(), fetches * 2);
    }
}
