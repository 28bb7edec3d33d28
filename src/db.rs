use crate::error::AppError;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::time::Duration;
use tokio_postgres::{Config as PgConfig, NoTls};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

static MIGRATIONS: &[(&str, &str)] = &[(
    "0001_read_receipts",
    include_str!("../migrations/0001_read_receipts.sql"),
)];

/// Build a deadpool-postgres pool and verify one connection
pub async fn init_pool(database_url: &str, max_connections: usize) -> Result<Pool, AppError> {
    let pg_config: PgConfig = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| AppError::Config(format!("DATABASE_URL: {e}")))?;

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    let pool = Pool::builder(mgr)
        .max_size(max_connections)
        .build()
        .map_err(|e| AppError::StartServer(format!("build pool: {e}")))?;

    tokio::time::timeout(CONNECT_TIMEOUT, async {
        let client = pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok::<(), AppError>(())
    })
    .await
    .map_err(|_| AppError::StartServer("database connect timed out".into()))??;

    tracing::info!(max_connections, "database pool created and verified");
    Ok(pool)
}

/// Apply the embedded schema; every statement is idempotent
pub async fn run_migrations(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;
    for (name, sql) in MIGRATIONS {
        client.batch_execute(sql).await?;
        tracing::info!(migration = %name, "migration applied");
    }
    Ok(())
}
