//! Application configuration.
//!
//! Layering: built-in defaults, then an optional TOML file, then
//! `SQLWARDEN_*` environment variables (`__` separates sections, e.g.
//! `SQLWARDEN_LLM__MODEL`). A `.env` file in the working directory is read
//! first.

use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{EmbeddingConfig, LLMConfig};
use crate::infrastructure::db::engine::EngineKind;
use crate::infrastructure::security::keyring::KeyringManager;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use validator::Validate;

pub const DEFAULT_CONFIG_FILE: &str = "sqlwarden.toml";
const ENV_PREFIX: &str = "SQLWARDEN_";
const KEYRING_SERVICE: &str = "sqlwarden";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    pub kind: EngineKind,
    pub url: String,
    /// `env:NAME`, `keychain:NAME`, `plain:VALUE` or the password itself.
    pub password_ref: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub max_connections: u32,
    #[validate(range(min = 1, max = 300))]
    pub connect_timeout_secs: u64,
    #[validate(range(min = 1, max = 3600))]
    pub query_timeout_secs: u64,
    pub read_only: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Sqlite,
            url: "sqlite://sqlwarden.db".to_string(),
            password_ref: None,
            max_connections: 5,
            connect_timeout_secs: 10,
            query_timeout_secs: 30,
            read_only: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetrievalConfig {
    #[validate(range(min = 1, max = 50))]
    pub schema_top_k: usize,
    #[validate(range(min = 0, max = 50))]
    pub row_top_k: usize,
    #[validate(range(min = 0, max = 10000))]
    pub rows_per_table: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            schema_top_k: 5,
            row_top_k: 3,
            rows_per_table: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub llm: LLMConfig,
    pub embedding: EmbeddingConfig,
    #[validate(nested)]
    pub retrieval: RetrievalConfig,
    pub policy_path: PathBuf,
    pub dictionary_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            llm: LLMConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            policy_path: PathBuf::from("role_access.json"),
            dictionary_path: None,
        }
    }
}

impl AppConfig {
    /// Load and validate. A missing file is not an error; defaults and the
    /// environment still apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!(path = %env_file.display(), "Loaded .env file");
        }

        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| AppError::ConfigError(format!("Failed to load configuration: {}", e)))?;

        config
            .validate()
            .map_err(|e| AppError::ConfigError(format!("Invalid configuration: {}", e)))?;

        info!(
            config_file = %path.display(),
            engine = %config.database.kind,
            llm_model = %config.llm.model,
            embedding = ?config.embedding.provider,
            "Configuration loaded"
        );
        Ok(config)
    }
}

/// Secrets held outside the config file.
pub struct ConfigService {
    keyring: KeyringManager,
}

impl ConfigService {
    pub fn new() -> Self {
        Self {
            keyring: KeyringManager::new(KEYRING_SERVICE),
        }
    }

    pub fn save_secret(&self, key: &str, secret: &str) -> Result<()> {
        self.keyring.set_secret(key, secret)
    }

    pub fn delete_secret(&self, key: &str) -> Result<()> {
        self.keyring.delete_secret(key)
    }

    /// Resolve a `password_ref` / `api_key` reference.
    /// Format: "env:DB_PASSWORD" -> reads the DB_PASSWORD env var
    /// Format: "keychain:name" -> reads the OS keychain entry `name`
    /// Format: "plain:secret" -> returns `secret` (development only)
    pub fn resolve_secret(&self, reference: &str) -> Result<String> {
        if let Some(env_key) = reference.strip_prefix("env:") {
            std::env::var(env_key).map_err(|_| {
                AppError::ConfigError(format!(
                    "Environment variable '{}' not found for secret",
                    env_key
                ))
            })
        } else if let Some(key_name) = reference.strip_prefix("keychain:") {
            self.keyring.get_secret(key_name)
        } else if let Some(secret) = reference.strip_prefix("plain:") {
            Ok(secret.to_string())
        } else {
            Ok(reference.to_string())
        }
    }

    /// Replace secret references in `config` with their resolved values.
    pub fn resolve_api_keys(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(reference) = config.llm.api_key.take() {
            config.llm.api_key = Some(self.resolve_secret(&reference)?);
        }
        if let Some(reference) = config.embedding.api_key.take() {
            config.embedding.api_key = Some(self.resolve_secret(&reference)?);
        }
        Ok(())
    }

    pub fn database_password(&self, config: &DatabaseConfig) -> Result<Option<String>> {
        config
            .password_ref
            .as_deref()
            .map(|reference| self.resolve_secret(reference))
            .transpose()
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm_config::LLMProvider;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.database.kind, EngineKind::Sqlite);
        assert!(config.database.read_only);
        assert_eq!(config.retrieval.schema_top_k, 5);
        assert_eq!(config.retrieval.row_top_k, 3);
        assert_eq!(config.llm.max_tokens, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
policy_path = "/etc/sqlwarden/roles.json"

[database]
kind = "mysql"
url = "mysql://reader@localhost/bank"
password_ref = "env:BANK_DB_PASSWORD"

[llm]
provider = "openai"
model = "gpt-4o-mini"

[retrieval]
row_top_k = 0
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.database.kind, EngineKind::Mysql);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.llm.provider, LLMProvider::OpenAI);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(config.retrieval.row_top_k, 0);
        assert_eq!(config.policy_path, PathBuf::from("/etc/sqlwarden/roles.json"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[llm]\ntop_p = 3.0").unwrap();

        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn test_resolve_secret_env() {
        std::env::set_var("SQLWARDEN_TEST_SECRET", "secret123");
        let service = ConfigService::new();
        assert_eq!(
            service.resolve_secret("env:SQLWARDEN_TEST_SECRET").unwrap(),
            "secret123"
        );
        std::env::remove_var("SQLWARDEN_TEST_SECRET");
        assert!(service.resolve_secret("env:SQLWARDEN_TEST_SECRET").is_err());
    }

    #[test]
    fn test_resolve_secret_plain_and_direct() {
        let service = ConfigService::new();
        assert_eq!(service.resolve_secret("plain:hunter2").unwrap(), "hunter2");
        assert_eq!(service.resolve_secret("direct_password").unwrap(), "direct_password");
    }

    #[test]
    fn test_database_password_absent() {
        let service = ConfigService::new();
        assert_eq!(
            service.database_password(&DatabaseConfig::default()).unwrap(),
            None
        );
    }
}
