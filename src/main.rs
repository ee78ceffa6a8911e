use anyhow::Context;
use log::info;

use warehouse_ledger::photos::PhotoStore;
use warehouse_ledger::{build_router, AppState, Config, Database};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let db = Database::open(&config.database)
        .with_context(|| format!("opening database {}", config.database.display()))?;
    let photos = PhotoStore::new(&config.upload_dir, &config.image_extensions)
        .with_context(|| format!("preparing upload directory {}", config.upload_dir.display()))?;

    let bind = config.bind;
    let app = build_router(AppState::new(db, photos, config));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!("warehouse ledger listening on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}
