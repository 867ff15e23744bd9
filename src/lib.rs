pub mod cli;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod sectors;
pub mod service;
pub mod settings;
pub mod sync;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use cli::Cli;
use remote::HttpRemote;
use service::LayerDataService;
use settings::SettingsStore;

pub use error::SyncError;

pub fn run() {
    // RUST_LOG wins when set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run_cli(Cli::parse()) {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(settings::default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings = SettingsStore::load(&data_dir)?;
    let mut sync_settings = settings.sync();
    if let Some(url) = &cli.base_url {
        sync_settings.base_url = url.clone();
    }

    log::info!(
        "ed3d starting with data in {} and files from {}",
        data_dir.display(),
        sync_settings.base_url
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let remote = Arc::new(HttpRemote::new(sync_settings.base_url.clone())?);
        let service = Arc::new(LayerDataService::open(
            &data_dir,
            settings.layers(),
            remote,
            sync_settings.to_options(),
        )?);
        cli::execute(cli.command, service, &settings).await
    })
}
