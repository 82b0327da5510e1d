use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use dailybasket_api::{config::AppConfig, db, events, handlers, logging, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    logging::init_tracing(&config.log_level);

    let db_pool = Arc::new(
        db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?,
    );

    if config.auto_migrate {
        db::run_migrations(&db_pool)
            .await
            .context("failed to run migrations")?;
    }
    db::ping(&db_pool).await.context("database ping failed")?;

    let (event_sender, event_receiver) = events::channel();
    tokio::spawn(events::process_events(event_receiver));

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(db_pool, config, event_sender);
    let app = handlers::router(state);

    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
