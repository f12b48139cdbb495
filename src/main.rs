use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use courtsplit::{
    api::{self, AppState},
    memory::MemoryBackend,
    store::MongoStore,
    Config,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;

    let state = match &config.mongodb_uri {
        Some(uri) => {
            info!(database = %config.database, "using MongoDB storage");
            let store = MongoStore::connect(uri, config.database.clone())
                .await
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::ConnectionRefused, err))?;
            let store = Arc::new(store);
            AppState::new(store.clone(), store.clone(), store, config.split)
        }
        None => {
            warn!("MONGODB_URI not set, keeping everything in memory");
            let backend = Arc::new(MemoryBackend::default());
            AppState::new(backend.clone(), backend.clone(), backend, config.split)
        }
    };
    let state = web::Data::new(
        state.with_session_ttl(Duration::from_secs(config.session_ttl_secs)),
    );

    let sweeper = state.clone();
    actix_web::rt::spawn(async move {
        let mut interval = actix_web::rt::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            sweeper.evict_expired().await;
        }
    });

    info!(host = %config.host, port = config.port, "listening");
    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .configure(api::configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
