use super::engine::{ensure_read_only, EngineKind, SqlEngine};
use crate::domain::error::{AppError, Result};
use crate::domain::query_result::QueryResult;
use crate::domain::schema::{ColumnInfo, ForeignKey, SchemaCatalog, TableSchema};
use crate::infrastructure::config::DatabaseConfig;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct SqliteEngine {
    pool: SqlitePool,
    query_timeout: Duration,
    read_only: bool,
}

impl SqliteEngine {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| {
                AppError::ConfigError(format!("Failed to parse connection string: {}", e))
            })?
            // an in-memory database must be writable so it can be seeded
            .read_only(config.read_only && !in_memory);

        // every in-memory connection is a separate database
        let max_connections = if in_memory { 1 } else { config.max_connections };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| AppError::ExecutionError(format!("Failed to connect: {}", e)))?;

        info!(url = %config.url, read_only = config.read_only, "Connected to SQLite");
        Ok(Self {
            pool,
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            read_only: config.read_only,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch(&self, statement: &str) -> Result<Vec<SqliteRow>> {
        tokio::time::timeout(self.query_timeout, sqlx::query(statement).fetch_all(&self.pool))
            .await
            .map_err(|_| {
                AppError::ExecutionError(format!(
                    "Query timed out after {} seconds",
                    self.query_timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::ExecutionError(e.to_string()))
    }

    fn to_result(rows: &[SqliteRow]) -> QueryResult {
        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows
            .iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|i| Self::extract_column_value(row, i))
                    .collect()
            })
            .collect();
        QueryResult::new(columns, rows)
    }

    /// SQLite values are dynamically typed; probe the common storage classes.
    fn extract_column_value(row: &SqliteRow, index: usize) -> serde_json::Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            return v.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            return v
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            return v.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
            return v.map(serde_json::Value::Bool).unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
            return v
                .map(|dt| serde_json::Value::String(dt.to_string()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
            return v
                .map(|d| serde_json::Value::String(d.to_string()))
                .unwrap_or(serde_json::Value::Null);
        }
        // declared types such as NUMERIC(12,2) still hold text or numbers
        row.try_get_unchecked::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(serde_json::Value::String)
            .unwrap_or(serde_json::Value::Null)
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        sqlx::query(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::ExecutionError(format!("Failed to list tables: {}", e)))?
        .iter()
        .map(|row| {
            row.try_get::<String, _>("name")
                .map_err(|e| AppError::ExecutionError(format!("Failed to read table name: {}", e)))
        })
        .collect()
    }

    async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        let columns = sqlx::query("SELECT name FROM pragma_table_info(?) ORDER BY cid")
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::ExecutionError(format!("Failed to list columns of {}: {}", table, e))
            })?
            .iter()
            .map(|row| {
                row.try_get::<String, _>("name").map(|name| ColumnInfo {
                    name,
                    description: None,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::ExecutionError(format!("Failed to read column: {}", e)))?;

        let foreign_keys = sqlx::query(
            r#"SELECT "from" AS from_column, "table" AS target_table, "to" AS target_column
               FROM pragma_foreign_key_list(?)"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::ExecutionError(format!("Failed to list foreign keys of {}: {}", table, e))
        })?
        .iter()
        .filter_map(|row| {
            let column: String = row.try_get("from_column").ok()?;
            let target_table: String = row.try_get("target_table").ok()?;
            // NULL when the key points at the target's primary key implicitly
            let target_column: String = row.try_get::<Option<String>, _>("target_column").ok()??;
            Some(ForeignKey {
                column,
                target_table,
                target_column,
            })
        })
        .collect();

        Ok(TableSchema {
            name: table.to_string(),
            description: None,
            columns,
            foreign_keys,
        })
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl SqlEngine for SqliteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    async fn execute(&self, statement: &str) -> Result<QueryResult> {
        if self.read_only {
            ensure_read_only(statement)?;
        }
        let started = Instant::now();
        let rows = self.fetch(statement).await?;
        let result = Self::to_result(&rows);
        info!(
            engine = "sqlite",
            rows = result.row_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Statement executed"
        );
        Ok(result)
    }

    async fn load_catalog(&self) -> Result<SchemaCatalog> {
        let mut tables = Vec::new();
        for name in self.table_names().await? {
            tables.push(self.table_schema(&name).await?);
        }
        debug!(tables = tables.len(), "SQLite schema introspected");
        Ok(SchemaCatalog::new(tables))
    }

    async fn sample_rows(&self, table: &str, limit: u32) -> Result<QueryResult> {
        let statement = format!("SELECT * FROM {} LIMIT {}", quote_identifier(table), limit);
        let rows = self.fetch(&statement).await?;
        Ok(Self::to_result(&rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn seeded_engine() -> SqliteEngine {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        let engine = SqliteEngine::connect(&config).await.unwrap();
        for statement in [
            "CREATE TABLE cust_mast (cust_id INTEGER PRIMARY KEY, cust_name TEXT NOT NULL)",
            "CREATE TABLE acct_mast (acct_id INTEGER PRIMARY KEY, cust_id INTEGER REFERENCES cust_mast(cust_id), balance REAL)",
            "INSERT INTO cust_mast VALUES (1, 'Asha'), (2, 'Ravi')",
            "INSERT INTO acct_mast VALUES (10, 1, 5200.5), (11, 2, NULL)",
        ] {
            sqlx::query(statement).execute(engine.pool()).await.unwrap();
        }
        engine
    }

    #[tokio::test]
    async fn test_execute_select() {
        let engine = seeded_engine().await;
        let result = engine
            .execute("SELECT acct_id, balance FROM acct_mast ORDER BY acct_id;")
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["acct_id", "balance"]);
        assert_eq!(
            result.rows,
            vec![
                vec![json!(10), json!(5200.5)],
                vec![json!(11), serde_json::Value::Null]
            ]
        );
    }

    #[tokio::test]
    async fn test_read_only_guard() {
        let engine = seeded_engine().await;
        let err = engine.execute("DELETE FROM cust_mast;").await.unwrap_err();
        assert!(matches!(err, AppError::ExecutionError(_)));
        assert_eq!(engine.execute("SELECT COUNT(*) AS n FROM cust_mast;").await.unwrap().rows[0][0], json!(2));
    }

    #[tokio::test]
    async fn test_engine_error_is_execution_error() {
        let engine = seeded_engine().await;
        let err = engine.execute("SELECT nope FROM cust_mast;").await.unwrap_err();
        match err {
            AppError::ExecutionError(msg) => assert!(msg.contains("nope")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_catalog() {
        let engine = seeded_engine().await;
        let catalog = engine.load_catalog().await.unwrap();
        assert_eq!(catalog.table_names(), vec!["acct_mast", "cust_mast"]);

        let acct = catalog.table("acct_mast").unwrap();
        assert_eq!(acct.column_names(), vec!["acct_id", "cust_id", "balance"]);
        assert_eq!(
            acct.foreign_keys,
            vec![ForeignKey {
                column: "cust_id".to_string(),
                target_table: "cust_mast".to_string(),
                target_column: "cust_id".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_sample_rows() {
        let engine = seeded_engine().await;
        let sample = engine.sample_rows("cust_mast", 1).await.unwrap();
        assert_eq!(sample.row_count(), 1);
        assert_eq!(
            sample.row_text("cust_mast", 0).unwrap(),
            "table: cust_mast | cust_id: 1 | cust_name: Asha"
        );
    }
}
