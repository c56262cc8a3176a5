use anyhow::{Context, Result};
use kycface_core::{OnnxFaceAnalyzer, Pipeline};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{KycFaceService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("kycfaced starting");

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        bus = ?config.bus,
        workers = config.workers,
        max_image_bytes = config.max_image_bytes,
        "configuration loaded"
    );

    let pipeline = Pipeline::new(config.pipeline)?;
    let model_dir = config.model_dir.clone();
    let engine = engine::spawn_engine(config.workers, pipeline, |_| {
        OnnxFaceAnalyzer::load(&model_dir)
    })
    .context("failed to start verification engine")?;

    let service = KycFaceService::new(engine, config.pipeline, config.max_image_bytes);
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to register {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "kycfaced ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("kycfaced shutting down");

    Ok(())
}
