pub mod engine;
pub mod mysql;
pub mod sqlite;

use crate::domain::error::Result;
use crate::infrastructure::config::DatabaseConfig;
use engine::{EngineKind, SqlEngine};
use std::sync::Arc;

/// Open the engine named by `config.kind`.
pub async fn connect(config: &DatabaseConfig, password: Option<&str>) -> Result<Arc<dyn SqlEngine>> {
    let engine: Arc<dyn SqlEngine> = match config.kind {
        EngineKind::Sqlite => Arc::new(sqlite::SqliteEngine::connect(config).await?),
        EngineKind::Mysql => Arc::new(mysql::MySqlEngine::connect(config, password).await?),
    };
    Ok(engine)
}
