//! Lucky Draw Back binary entrypoint wiring REST, SSE, the session scheduler and storage.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lucky_draw_back::{
    config::{AppConfig, StoreBackend},
    dao::session_store::MemorySessionStore,
    routes,
    services::scheduler::SessionScheduler,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = config.store;
    let app_state = AppState::new(config);

    match backend {
        StoreBackend::Memory => install_memory_store(&app_state).await,
        StoreBackend::Mongo => start_mongo_store(&app_state).await,
    }

    let scheduler = SessionScheduler::new(app_state.clone());
    let scheduler_task = tokio::spawn(scheduler.run(app_state.shutdown_watcher()));

    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Open SSE streams would otherwise hold the graceful shutdown forever.
            info!("shutdown requested; stopping scheduler and SSE streams");
            app_state.begin_shutdown();
        })
        .await
        .context("serving axum")?;

    scheduler_task
        .await
        .context("waiting for the session scheduler")?;

    Ok(())
}

async fn install_memory_store(state: &SharedState) {
    info!("using in-memory session store; data is lost on restart");
    state
        .install_session_store(Arc::new(MemorySessionStore::new()))
        .await;
}

/// Supervise the MongoDB connection in the background; the server stays in
/// degraded mode until it is reachable.
#[cfg(feature = "mongo-store")]
async fn start_mongo_store(state: &SharedState) {
    use lucky_draw_back::{
        dao::{
            session_store::{
                SessionStore,
                mongodb::{MongoConfig, MongoSessionStore},
            },
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    let uri = env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
    let db_name = env::var("MONGO_DB").ok();

    tokio::spawn(storage_supervisor::run(state.clone(), move || {
        let uri = uri.clone();
        let db_name = db_name.clone();
        async move {
            let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
            let store = MongoSessionStore::connect(config).await?;
            Ok::<Arc<dyn SessionStore>, StorageError>(Arc::new(store))
        }
    }));
}

#[cfg(not(feature = "mongo-store"))]
async fn start_mongo_store(state: &SharedState) {
    warn!("built without the mongo-store feature; falling back to the in-memory store");
    install_memory_store(state).await;
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
