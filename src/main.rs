//! DailyFlow journaling backend
//!
//! Diary listing with live filters, image outbox reconciliation and a daily
//! reminder, served over REST.

mod api;
mod auth;
mod config;
mod db;
mod diaries;
mod errors;
mod models;
mod reminder;
mod remote;
mod search;
mod sync;
mod view;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::{OutboxStore, PreferencesStore};
use diaries::DiaryService;
use reminder::{LogNotifier, ReminderService, TokioAlarmScheduler};
use remote::{FsObjectStorage, SqliteDiaryCollection};
use search::SearchIndex;
use sync::ImageSyncRunner;
use view::DiaryQueryCoordinator;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub diaries: Arc<DiaryService>,
    pub coordinator: Arc<DiaryQueryCoordinator>,
    pub reminder: Arc<ReminderService>,
    pub sync: ImageSyncRunner,
    pub outbox: OutboxStore,
    pub config: Arc<Config>,
}

impl AppState {
    /// Open the stores, wire the services and start the background tasks
    /// every instance needs (reminder alarm loop, initial listing).
    pub async fn init(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let pool = db::init_database(&config.db_path).await?;

        let search = Arc::new(SearchIndex::open(&config.index_path)?);
        let collection = Arc::new(SqliteDiaryCollection::new(
            pool.clone(),
            search,
            config.utc_offset,
        ));
        let indexed = collection.reindex().await?;
        tracing::info!("Search index built with {} entries", indexed);

        let storage = Arc::new(FsObjectStorage::new(&config.storage_root));
        storage.init().await?;

        let outbox = OutboxStore::new(pool.clone());
        let sync = ImageSyncRunner::new(outbox.clone(), storage.clone());
        let diaries = Arc::new(DiaryService::new(
            collection.clone(),
            storage,
            outbox.clone(),
            config.owner_id.clone(),
        ));

        let (scheduler, fired) = TokioAlarmScheduler::new();
        let reminder = Arc::new(ReminderService::new(
            PreferencesStore::new(pool),
            Arc::new(scheduler),
            Arc::new(LogNotifier),
            config.utc_offset,
        ));
        if let Some(at) = reminder.on_boot().await? {
            tracing::info!("Daily reminder armed for {}", at);
        }
        reminder.clone().run(fired);

        let coordinator = Arc::new(DiaryQueryCoordinator::new(
            collection,
            config.owner_id.clone(),
        ));
        coordinator.reset().await?;

        Ok(Self {
            diaries,
            coordinator,
            reminder,
            sync,
            outbox,
            config: Arc::new(config),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting DailyFlow backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Storage root: {:?}", config.storage_root);
    tracing::info!("Owner: {}", config.owner_id);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (DAILYFLOW_API_PSK). Authentication is disabled!");
    }

    let bind_addr = config.bind_addr;
    let state = AppState::init(config).await?;

    if state.config.reconcile_on_start {
        let runner = state.sync.clone();
        tokio::spawn(async move {
            runner.reconcile_all().await;
        });
    }

    let coordinator = state.coordinator.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    coordinator.shutdown().await;
    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        // Diaries
        .route(
            "/diaries",
            post(api::create_diary).delete(api::delete_all_diaries),
        )
        .route("/diaries/transfer", post(api::transfer_diaries))
        .route(
            "/diaries/{id}",
            get(api::get_diary)
                .put(api::update_diary)
                .delete(api::delete_diary),
        )
        // Listing
        .route("/view", get(api::get_view))
        .route(
            "/view/filter",
            put(api::set_view_filter).delete(api::clear_view_filter),
        )
        // Reminder
        .route(
            "/reminder",
            get(api::get_reminder).put(api::update_reminder),
        )
        // Image outbox
        .route("/sync/outbox", get(api::get_outbox))
        .route("/sync/reconcile", post(api::reconcile_outbox))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
