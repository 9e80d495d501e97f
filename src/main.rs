use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use asemail::app::{self, AppState};
use asemail::auth::Authenticator;
use asemail::config::AppConfig;
use asemail::graph::GraphClient;
use asemail::rules::{ActionExecutor, RuleEngine};
use asemail::storage::Database;
use asemail::sync::SyncEngine;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::load()?;
    let db = Arc::new(Database::new_default().await?);
    if let Some(path) = db.path() {
        tracing::info!(path = %path.display(), "Database ready");
    }

    let provider = Arc::new(GraphClient::new(
        config.graph_base_url.clone(),
        config.page_size,
    ));
    let auth = Arc::new(Authenticator::from_config(&config)?);

    let sync = Arc::new(SyncEngine::new(db.clone(), provider.clone(), auth.clone()));
    let executor = ActionExecutor::new(db.clone(), provider, auth);
    let rules = Arc::new(RuleEngine::new(db, executor));

    let state = AppState { sync, rules };
    app::serve(&config.bind_addr, state).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
