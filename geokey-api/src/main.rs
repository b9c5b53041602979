//! geokey-api - Citizen-science contribution platform service
//!
//! Serves the public JSON/GeoJSON API over a SQLite store: projects,
//! categories, georeferenced observations with lifecycle moderation,
//! threaded comments, media attachments and the append-only audit log.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use geokey_api::{build_router, AppState};
use geokey_common::config::{resolve_data_root, DataRoot};
use geokey_common::db::init::{init_database, setting_i64};
use geokey_common::events::EventBus;

#[derive(Debug, Parser)]
#[command(name = "geokey-api", version, about = "GeoKey contribution platform API")]
struct Args {
    /// Data root directory (database file and media uploads)
    #[arg(long, env = "GEOKEY_DATA_ROOT")]
    data_root: Option<String>,

    /// Address to listen on
    #[arg(long, env = "GEOKEY_LISTEN", default_value = "127.0.0.1:8094")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Build identification logged before any database work
    info!(
        "Starting GeoKey API (geokey-api) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let root = resolve_data_root(
        args.data_root.as_deref(),
        "GEOKEY_DATA_ROOT",
        Some("data_root"),
    )?;
    let data_root = DataRoot::new(root);
    data_root.ensure_directories()?;
    info!("Data root: {}", data_root.root().display());

    let db_path = data_root.database_path();
    let pool = init_database(&db_path).await?;

    let bus_capacity = setting_i64(&pool, "audit_bus_capacity", 1024).await? as usize;
    let events = EventBus::new(bus_capacity);

    let state = AppState::new(pool, events, data_root.media_dir());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!("geokey-api listening on http://{}", args.listen);
    info!("Health check: http://{}/health", args.listen);

    axum::serve(listener, app).await?;

    Ok(())
}
