//! Command-line front end over the layer data service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::error;
use serde::Serialize;

use crate::models::{BoundingSphere, Coordinates};
use crate::service::{BackgroundSync, LayerDataService};
use crate::settings::{SettingsStore, SyncSettings};
use crate::sync::CachePolicy;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sync and query a cached 3D starmap")]
pub struct Cli {
    /// Directory holding settings and layer stores (default: $ED3D_DATA_DIR or .ed3d)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Base URL for static layer files and sectors.json (default: $ED3D_BASE_URL or settings)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List configured layers and which are on
    Layers,

    /// Bring one layer, or every layer, up to date
    Sync {
        layer: Option<String>,

        /// Keep resyncing remote layers until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Print the points of a region
    Region {
        /// Only this layer; default is every active layer merged
        #[arg(long)]
        layer: Option<String>,

        #[command(flatten)]
        at: Position,

        #[arg(long, default_value_t = 100.0)]
        radius: f64,

        /// Print every point instead of a per-layer count
        #[arg(long)]
        points: bool,
    },

    /// Describe the system at exact coordinates
    SystemAt {
        #[command(flatten)]
        at: Position,
    },

    /// Import the named sector catalog
    Catalog,

    /// Drop cached data for a layer, or for everything
    Reset { layer: Option<String> },

    /// Switch a layer on or off and remember it for later runs
    Toggle {
        layer: String,

        #[arg(long)]
        off: bool,
    },

    /// Show sync settings, changing any that are given
    Settings(SettingsUpdate),
}

#[derive(Args, Debug, Default, Clone)]
pub struct SettingsUpdate {
    #[arg(long)]
    pub max_radius: Option<f64>,

    #[arg(long)]
    pub fetch_parallelism: Option<usize>,

    #[arg(long, value_enum)]
    pub cache_policy: Option<CachePolicy>,

    #[arg(long)]
    pub refetch_empty_sectors: Option<bool>,

    #[arg(long)]
    pub resync_interval_secs: Option<u64>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.max_radius.is_none()
            && self.fetch_parallelism.is_none()
            && self.cache_policy.is_none()
            && self.refetch_empty_sectors.is_none()
            && self.resync_interval_secs.is_none()
    }

    pub fn apply(&self, sync: &mut SyncSettings) {
        if let Some(radius) = self.max_radius {
            sync.max_radius = radius;
        }
        if let Some(parallelism) = self.fetch_parallelism {
            sync.fetch_parallelism = parallelism;
        }
        if let Some(policy) = self.cache_policy {
            sync.cache_policy = policy;
        }
        if let Some(refetch) = self.refetch_empty_sectors {
            sync.refetch_empty_sectors = refetch;
        }
        if let Some(secs) = self.resync_interval_secs {
            sync.resync_interval_secs = secs;
        }
    }
}

#[derive(Args, Debug, Clone, Copy)]
pub struct Position {
    #[arg(long, allow_hyphen_values = true)]
    pub x: f64,
    #[arg(long, allow_hyphen_values = true)]
    pub y: f64,
    #[arg(long, allow_hyphen_values = true)]
    pub z: f64,
}

impl From<Position> for Coordinates {
    fn from(p: Position) -> Self {
        Coordinates::new(p.x, p.y, p.z)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Switch `name` on or off now and store it as the layer's default.
pub fn toggle_layer(
    service: &LayerDataService,
    settings: &SettingsStore,
    name: &str,
    on: bool,
) -> Result<bool> {
    let changed = service.layer_toggle(name, on)?;
    settings.update_layers(|layers| {
        for layer in layers.iter_mut().filter(|layer| layer.name == name) {
            layer.default_on = on;
        }
    })?;
    Ok(changed)
}

/// Persist `update` (when it changes anything) and return the effective settings.
pub fn update_settings(settings: &SettingsStore, update: &SettingsUpdate) -> Result<SyncSettings> {
    if !update.is_empty() {
        settings.update_sync(|sync| update.apply(sync))?;
    }
    Ok(settings.sync())
}

pub async fn execute(
    command: Command,
    service: Arc<LayerDataService>,
    settings: &SettingsStore,
) -> Result<()> {
    match command {
        Command::Layers => {
            let active = service.active_layers();
            for layer in service.layers() {
                let marker = if active.contains(&layer.name) { "*" } else { " " };
                let kind = if layer.is_static() { "static" } else { "remote" };
                println!("{marker} {:<16} {:<8} {}", layer.name, kind, layer.pretty_name);
            }
        }
        Command::Sync { layer, watch } => {
            match layer {
                Some(name) => print_json(&service.sync_layer(&name).await?)?,
                None => {
                    for layer in service.layers() {
                        match service.sync_layer(&layer.name).await {
                            Ok(report) => print_json(&report)?,
                            Err(err) => error!("Sync of {} failed: {err:#}", layer.name),
                        }
                    }
                }
            }
            if watch {
                let mut background = BackgroundSync::new();
                background.start(service.clone(), settings.sync().resync_interval())?;
                tokio::signal::ctrl_c()
                    .await
                    .context("failed to listen for Ctrl-C")?;
                background.stop().await?;
            }
        }
        Command::Region {
            layer,
            at,
            radius,
            points,
        } => {
            let region = BoundingSphere::new(at.into(), radius);
            let result = match &layer {
                Some(name) => service.get_layer(name, &region).await?,
                None => service.get_layers(&region).await?,
            };
            if points {
                print_json(&result)?;
            } else {
                let mut counts = std::collections::BTreeMap::<&str, usize>::new();
                for point in &result {
                    *counts.entry(point.source_tag.as_str()).or_default() += 1;
                }
                print_json(&counts)?;
            }
        }
        Command::SystemAt { at } => match service.get_system_at(at.into()).await? {
            Some(info) => print_json(&info)?,
            None => println!("No system at {}", Coordinates::from(at)),
        },
        Command::Catalog => {
            let report = service.sync_sector_catalog().await?;
            print_json(&report)?;
        }
        Command::Reset { layer } => match layer {
            Some(name) => service.reset_layer(&name).await?,
            None => {
                for name in service.layers().iter().map(|l| l.name.clone()).collect::<Vec<_>>() {
                    service.reset_layer(&name).await?;
                }
                service.reset_sector_catalog().await?;
            }
        },
        Command::Toggle { layer, off } => {
            let on = !off;
            if !toggle_layer(&service, settings, &layer, on)? {
                println!("{layer} was already {}", if on { "on" } else { "off" });
            }
        }
        Command::Settings(update) => {
            let current = update_settings(settings, &update)?;
            println!("{}", settings.path().display());
            print_json(&current)?;
            if !update.is_empty() {
                println!("Changes apply from the next run");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_region_with_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "ed3d", "--data-dir", "/tmp/ed3d", "region", "--layer", "edsm", "--x", "-9530.5",
            "--y", "-910.28", "--z", "19808.125", "--radius", "250",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/ed3d")));
        match cli.command {
            Command::Region {
                layer,
                at,
                radius,
                points,
            } => {
                assert_eq!(layer.as_deref(), Some("edsm"));
                assert_eq!(Coordinates::from(at), Coordinates::new(-9530.5, -910.28, 19808.125));
                assert_eq!(radius, 250.0);
                assert!(!points);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_settings_update() {
        let cli = Cli::try_parse_from([
            "ed3d",
            "settings",
            "--max-radius",
            "250",
            "--cache-policy",
            "revalidate",
            "--refetch-empty-sectors",
            "true",
        ])
        .unwrap();
        let Command::Settings(update) = cli.command else {
            panic!("expected settings command");
        };
        assert_eq!(update.max_radius, Some(250.0));
        assert_eq!(update.cache_policy, Some(CachePolicy::Revalidate));
        assert_eq!(update.refetch_empty_sectors, Some(true));
        assert_eq!(update.fetch_parallelism, None);
    }

    #[test]
    fn settings_update_persists_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::new(dir.path().join("settings.json")).unwrap();

        let shown = update_settings(&settings, &SettingsUpdate::default()).unwrap();
        assert_eq!(shown, SyncSettings::default());
        assert!(!settings.path().exists());

        let update = SettingsUpdate {
            max_radius: Some(250.0),
            cache_policy: Some(CachePolicy::Revalidate),
            ..SettingsUpdate::default()
        };
        let current = update_settings(&settings, &update).unwrap();
        assert_eq!(current.max_radius, 250.0);
        assert_eq!(current.cache_policy, CachePolicy::Revalidate);
        assert_eq!(current.fetch_parallelism, SyncSettings::default().fetch_parallelism);

        let reopened = SettingsStore::new(settings.path().to_path_buf()).unwrap();
        assert_eq!(reopened.sync(), current);
    }

    #[tokio::test]
    async fn toggle_switches_layer_and_remembers_default() {
        use crate::models::Layer;
        use crate::remote::testing::ScriptedRemote;
        use crate::sectors::SectorGrid;
        use crate::sync::SyncOptions;

        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        let layers = vec![Layer::new_remote("edsm", "EDSM", "http://cube.test/cube")];
        settings.update_layers(|stored| *stored = layers.clone()).unwrap();
        let service = LayerDataService::open(
            dir.path(),
            settings.layers(),
            Arc::new(ScriptedRemote::new(SectorGrid::default())),
            SyncOptions::default(),
        )
        .unwrap();

        assert!(toggle_layer(&service, &settings, "edsm", true).unwrap());
        assert_eq!(service.active_layers(), vec!["edsm".to_string()]);
        assert!(!toggle_layer(&service, &settings, "edsm", true).unwrap());

        let reopened = SettingsStore::new(settings.path().to_path_buf()).unwrap();
        assert!(reopened.layers()[0].default_on);

        assert!(toggle_layer(&service, &settings, "missing", true).is_err());
    }

    #[test]
    fn sync_layer_is_optional() {
        let cli = Cli::try_parse_from(["ed3d", "sync", "--watch"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Sync {
                layer: None,
                watch: true
            }
        ));
    }
}
