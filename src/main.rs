use actix_web::{middleware::Logger, web, App, HttpServer};
use read_receipt_service::{
    config::{self, StoreBackend},
    db, error, logging, routes,
    state::AppState,
    store::{MemoryReceiptStore, PgReceiptStore, ReceiptStore},
};
use std::sync::Arc;

async fn build_store(cfg: &config::Config) -> Result<Arc<dyn ReceiptStore>, error::AppError> {
    match cfg.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store, data is lost on restart");
            Ok(Arc::new(MemoryReceiptStore::new()))
        }
        StoreBackend::Postgres => {
            let database_url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| error::AppError::Config("DATABASE_URL is required".into()))?;
            let pool = db::init_pool(database_url, cfg.db_max_connections)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            if cfg.run_migrations {
                db::run_migrations(&pool)
                    .await
                    .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;
            }
            Ok(Arc::new(PgReceiptStore::new(pool)))
        }
    }
}

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let store = build_store(&cfg).await?;
    let state = AppState::new(store, cfg.clone());

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, backend = ?cfg.store_backend, "starting read-receipt-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("REST server: {e}")))
}
