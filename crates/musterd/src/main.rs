use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod attendance;
mod config;
mod dbus;
mod engine;
mod service;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "musterd starting");

    let store = muster_store::Store::open(&config.db_path).await?;
    let engine = engine::spawn(&config.scrfd_model_path(), &config.arcface_model_path())?;

    let service = service::Service::new(
        engine,
        store,
        config.similarity_threshold,
        config.grace_minutes,
        std::time::Duration::from_secs(config.infer_timeout_secs),
    );

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _connection = builder
        .name(dbus::BUS_NAME)?
        .serve_at(dbus::OBJECT_PATH, dbus::AttendanceInterface::new(service))?
        .build()
        .await?;

    tracing::info!(bus = dbus::BUS_NAME, "musterd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("musterd shutting down");

    Ok(())
}
