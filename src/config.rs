use crate::error::AppError;
use dotenvy::dotenv;
use std::collections::HashMap;
use std::env;

const MAX_MESSAGE_PAGE_LIMIT: usize = 500;
const DEFAULT_MESSAGE_PAGE_LIMIT: usize = 100;
const DEFAULT_DB_MAX_CONNECTIONS: usize = 16;
const DEFAULT_PORT: u16 = 3000;

/// Which `ReceiptStore` implementation backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::Config(format!(
                "STORE_BACKEND must be 'postgres' or 'memory', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: usize,
    pub port: u16,
    /// Newest-first page size for message feeds and seen-by views
    pub message_page_limit: usize,
    pub run_migrations: bool,
}

impl Config {
    /// Defaults with the in-memory store, same as `STORE_BACKEND=memory`
    /// and nothing else set. Without `STORE_BACKEND` the service uses
    /// PostgreSQL.
    pub fn in_memory() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            port: DEFAULT_PORT,
            message_page_limit: DEFAULT_MESSAGE_PAGE_LIMIT,
            run_migrations: true,
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_vars(&env::vars().collect())
    }

    /// Build the config from an explicit variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, AppError> {
        let store_backend = vars
            .get("STORE_BACKEND")
            .map(|v| StoreBackend::parse(v))
            .transpose()?
            .unwrap_or(StoreBackend::Postgres);

        let database_url = vars
            .get("DATABASE_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config("DATABASE_URL missing".into()));
        }

        let db_max_connections = parse_var(vars, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?;
        if db_max_connections == 0 {
            return Err(AppError::Config("DB_MAX_CONNECTIONS must be positive".into()));
        }

        let port = parse_var(vars, "PORT", DEFAULT_PORT)?;

        let message_page_limit = parse_var(vars, "MESSAGE_PAGE_LIMIT", DEFAULT_MESSAGE_PAGE_LIMIT)?;
        if message_page_limit == 0 || message_page_limit > MAX_MESSAGE_PAGE_LIMIT {
            return Err(AppError::Config(format!(
                "MESSAGE_PAGE_LIMIT must be between 1 and {MAX_MESSAGE_PAGE_LIMIT}"
            )));
        }

        let run_migrations = parse_var(vars, "RUN_MIGRATIONS", true)?;

        Ok(Self {
            store_backend,
            database_url,
            db_max_connections,
            port,
            message_page_limit,
            run_migrations,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, AppError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: '{raw}'"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let err = Config::from_vars(&vars(&[])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_memory_backend_defaults() {
        let cfg = Config::from_vars(&vars(&[("STORE_BACKEND", "memory")])).unwrap();
        assert_eq!(cfg.store_backend, StoreBackend::Memory);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.message_page_limit, 100);
        assert!(cfg.run_migrations);
        assert_eq!(cfg, Config::in_memory());
    }

    #[test]
    fn test_overrides() {
        let cfg = Config::from_vars(&vars(&[
            ("DATABASE_URL", "postgres://localhost/receipts"),
            ("PORT", "8088"),
            ("DB_MAX_CONNECTIONS", "4"),
            ("MESSAGE_PAGE_LIMIT", "50"),
            ("RUN_MIGRATIONS", "false"),
        ]))
        .unwrap();
        assert_eq!(cfg.store_backend, StoreBackend::Postgres);
        assert_eq!(cfg.port, 8088);
        assert_eq!(cfg.db_max_connections, 4);
        assert_eq!(cfg.message_page_limit, 50);
        assert!(!cfg.run_migrations);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_vars(&vars(&[("STORE_BACKEND", "redis")])).is_err());
        assert!(Config::from_vars(&vars(&[
            ("STORE_BACKEND", "memory"),
            ("PORT", "not-a-port")
        ]))
        .is_err());
        assert!(Config::from_vars(&vars(&[
            ("STORE_BACKEND", "memory"),
            ("MESSAGE_PAGE_LIMIT", "10000")
        ]))
        .is_err());
    }
}
