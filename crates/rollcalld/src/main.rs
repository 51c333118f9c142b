use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod service;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();
    let shift_policy = config.load_shift_policy()?;
    let store = rollcall_store::Store::open(&config.db_path)?;
    tracing::info!(db = %config.db_path.display(), "store opened");

    let service = service::AttendanceService::spawn(
        store,
        config.embedding_dim,
        config.match_policy(),
        shift_policy,
        Duration::from_secs(config.commit_timeout_secs),
    )?;

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _connection = builder
        .name("org.rollcall.Attendance1")?
        .serve_at(
            "/org/rollcall/Attendance1",
            dbus_interface::AttendanceInterface::new(service),
        )?
        .build()
        .await?;

    tracing::info!("rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
