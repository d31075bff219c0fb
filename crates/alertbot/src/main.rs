use std::sync::Arc;

use alertbot_core::{config::Config, news::ProcessedNewsStore, subscriptions::SubscriptionStore};
use alertbot_store::{Database, SqliteProcessedNewsStore, SqliteSubscriptionStore};

#[tokio::main]
async fn main() -> Result<(), alertbot_core::Error> {
    alertbot_core::logging::init("alertbot")?;

    let cfg = Arc::new(Config::load()?);

    let db = Database::connect(&cfg.database_url).await?;
    db.migrate().await?;
    let store: Arc<dyn SubscriptionStore> = Arc::new(SqliteSubscriptionStore::new(db.clone()));
    let news_store: Arc<dyn ProcessedNewsStore> = Arc::new(SqliteProcessedNewsStore::new(db.clone()));

    let result = alertbot_telegram::router::run_polling(cfg, store, news_store)
        .await
        .map_err(|e| alertbot_core::Error::External(format!("telegram bot failed: {e}")));

    db.close().await;
    tracing::info!("Database closed");
    result
}
