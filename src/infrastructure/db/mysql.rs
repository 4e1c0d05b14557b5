use super::engine::{ensure_read_only, EngineKind, SqlEngine};
use crate::domain::error::{AppError, Result};
use crate::domain::query_result::QueryResult;
use crate::domain::schema::{ColumnInfo, ForeignKey, SchemaCatalog, TableSchema};
use crate::infrastructure::config::DatabaseConfig;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct MySqlEngine {
    pool: MySqlPool,
    query_timeout: Duration,
    read_only: bool,
}

impl MySqlEngine {
    pub async fn connect(config: &DatabaseConfig, password: Option<&str>) -> Result<Self> {
        let mut options = MySqlConnectOptions::from_str(&config.url).map_err(|e| {
            AppError::ConfigError(format!("Failed to parse connection string: {}", e))
        })?;
        if let Some(password) = password {
            options = options.password(password);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| AppError::ExecutionError(format!("Failed to connect: {}", e)))?;

        info!(read_only = config.read_only, "Connected to MySQL");
        Ok(Self {
            pool,
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            read_only: config.read_only,
        })
    }

    async fn fetch(&self, statement: &str) -> Result<Vec<MySqlRow>> {
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

    fn to_result(rows: &[MySqlRow]) -> QueryResult {
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

    fn extract_column_value(row: &MySqlRow, index: usize) -> serde_json::Value {
        if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            return v.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            return v.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u64>, _>(index) {
            return v.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            return v
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(index) {
            return v
                .and_then(|n| serde_json::Number::from_f64(n as f64))
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null);
        }
        // SUM/AVG and DECIMAL columns
        if let Ok(v) = row.try_get::<Option<BigDecimal>, _>(index) {
            return v.map(decimal_value).unwrap_or(serde_json::Value::Null);
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
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(index) {
            return v
                .map(|t| serde_json::Value::String(t.to_string()))
                .unwrap_or(serde_json::Value::Null);
        }

        // Default to null for unsupported types
        serde_json::Value::Null
    }

    async fn table_comments(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT TABLE_NAME AS table_name, TABLE_COMMENT AS table_comment
             FROM information_schema.tables
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
             ORDER BY TABLE_NAME",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::ExecutionError(format!("Failed to list tables: {}", e)))?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("table_name").map_err(|e| {
                    AppError::ExecutionError(format!("Failed to read table name: {}", e))
                })?;
                let comment: String = row
                    .try_get::<Option<String>, _>("table_comment")
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                Ok((name, comment))
            })
            .collect()
    }
}

fn decimal_value(value: BigDecimal) -> serde_json::Value {
    let text = value.to_string();
    text.parse::<serde_json::Number>()
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::String(text))
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[async_trait]
impl SqlEngine for MySqlEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Mysql
    }

    async fn execute(&self, statement: &str) -> Result<QueryResult> {
        if self.read_only {
            ensure_read_only(statement)?;
        }
        let started = Instant::now();
        let rows = self.fetch(statement).await?;
        let result = Self::to_result(&rows);
        info!(
            engine = "mysql",
            rows = result.row_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Statement executed"
        );
        Ok(result)
    }

    async fn load_catalog(&self) -> Result<SchemaCatalog> {
        let mut tables: Vec<TableSchema> = self
            .table_comments()
            .await?
            .into_iter()
            .map(|(name, comment)| TableSchema {
                name,
                description: non_empty(comment),
                columns: Vec::new(),
                foreign_keys: Vec::new(),
            })
            .collect();

        let column_rows = sqlx::query(
            "SELECT TABLE_NAME AS table_name, COLUMN_NAME AS column_name,
                    COLUMN_COMMENT AS column_comment
             FROM information_schema.columns
             WHERE TABLE_SCHEMA = DATABASE()
             ORDER BY TABLE_NAME, ORDINAL_POSITION",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::ExecutionError(format!("Failed to list columns: {}", e)))?;

        for row in &column_rows {
            let table_name: String = row.try_get("table_name").map_err(|e| {
                AppError::ExecutionError(format!("Failed to read table name: {}", e))
            })?;
            let column_name: String = row.try_get("column_name").map_err(|e| {
                AppError::ExecutionError(format!("Failed to read column name: {}", e))
            })?;
            let comment: Option<String> = row.try_get("column_comment").ok().flatten();
            if let Some(table) = tables.iter_mut().find(|t| t.name == table_name) {
                table.columns.push(ColumnInfo {
                    name: column_name,
                    description: comment.and_then(non_empty),
                });
            }
        }

        let fk_rows = sqlx::query(
            "SELECT TABLE_NAME AS table_name, COLUMN_NAME AS column_name,
                    REFERENCED_TABLE_NAME AS target_table,
                    REFERENCED_COLUMN_NAME AS target_column
             FROM information_schema.key_column_usage
             WHERE TABLE_SCHEMA = DATABASE() AND REFERENCED_TABLE_NAME IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::ExecutionError(format!("Failed to list foreign keys: {}", e)))?;

        for row in &fk_rows {
            let (Ok(table_name), Ok(column), Ok(target_table), Ok(target_column)) = (
                row.try_get::<String, _>("table_name"),
                row.try_get::<String, _>("column_name"),
                row.try_get::<String, _>("target_table"),
                row.try_get::<String, _>("target_column"),
            ) else {
                continue;
            };
            if let Some(table) = tables.iter_mut().find(|t| t.name == table_name) {
                table.foreign_keys.push(ForeignKey {
                    column,
                    target_table,
                    target_column,
                });
            }
        }

        debug!(tables = tables.len(), "MySQL schema introspected");
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

    #[test]
    fn test_decimal_value() {
        let value = BigDecimal::from_str("1234.50").unwrap();
        assert_eq!(decimal_value(value), serde_json::json!(1234.5));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("txn_hist"), "`txn_hist`");
        assert_eq!(quote_identifier("odd`name"), "`odd``name`");
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("  ".to_string()), None);
        assert_eq!(non_empty(" Customer master ".to_string()), Some("Customer master".to_string()));
    }
}
