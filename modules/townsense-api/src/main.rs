use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use townsense_api::{router, AppState};
use townsense_common::Config;
use townsense_intake::{Intake, IntakeDeps};
use townsense_store::{
    FsImageStore, ImageStore, MemoryImageStore, MemoryReportStore, PgReportStore, ReportStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("townsense=info".parse()?))
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn ReportStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            let store = PgReportStore::new(pool);
            store.migrate().await?;
            info!("Connected to Postgres, migrations applied");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, reports are kept in memory and lost on restart");
            Arc::new(MemoryReportStore::new())
        }
    };

    let images: Arc<dyn ImageStore> = match &config.image_dir {
        Some(dir) => Arc::new(FsImageStore::new(dir)),
        None => {
            warn!("IMAGE_DIR not set, photos are kept in memory");
            Arc::new(MemoryImageStore::new())
        }
    };

    let deps = IntakeDeps::from_config(&config, store, images)?;
    let state = Arc::new(AppState::new(
        Arc::new(Intake::new(deps)),
        config.submissions_per_hour,
    ));
    let app = router(state);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("TownSense API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
