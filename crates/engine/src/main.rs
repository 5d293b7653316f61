//! ReviewFlow Server
//!
//! An async Rust server exposing the ReviewFlow workflow engine: workflow
//! definitions, workflow items, the task pool and claims.

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reviewflow_engine::{
    actions::ActionRegistry,
    collaborators::{ConfiguredCurator, CurationResult},
    config::{AppConfig, CurationMode, DatabaseConfig, StoreKind},
    db::{create_pool, schema, DbPool},
    definition::DefinitionRegistry,
    engine::WorkflowEngine,
    handlers,
    notify::{LogNotifier, NatsNotifier, Notifier},
    roles::{RoleResolver, StaticRoleSource},
    state::AppState,
    store::{MemoryStore, PgStore, WorkflowStore},
    ResultExt,
};

/// Initialize tracing/logging.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,reviewflow_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router with all routes.
fn build_router(state: AppState, db_pool: Option<DbPool>) -> Router {
    // CORS configuration - allow all origins for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::api_health))
        .with_state(state.clone());

    // Workflow definition routes
    let workflow_routes = Router::new()
        .route("/api/workflows", get(handlers::workflows::list))
        .route("/api/workflows/reload", post(handlers::workflows::reload))
        .route("/api/workflows/{workflow_id}", get(handlers::workflows::get))
        .with_state(state.clone());

    // Workflow item routes
    let item_routes = Router::new()
        .route(
            "/api/workflow/items",
            post(handlers::items::start).get(handlers::items::list),
        )
        .route("/api/workflow/items/{item_id}", get(handlers::items::get))
        .route(
            "/api/workflow/items/{item_id}/history",
            get(handlers::items::history),
        )
        .route(
            "/api/workflow/items/{item_id}/abort",
            post(handlers::items::abort),
        )
        .route(
            "/api/workflow/items/{item_id}/curation",
            post(handlers::items::resume_curation),
        )
        .with_state(state.clone());

    // Task pool routes
    let task_routes = Router::new()
        .route("/api/tasks/pool", get(handlers::tasks::pool))
        .route("/api/tasks/claimed", get(handlers::tasks::claimed))
        .route("/api/tasks/claim", post(handlers::tasks::claim))
        .route("/api/tasks/unclaim", post(handlers::tasks::unclaim))
        .route("/api/tasks/execute", post(handlers::tasks::execute))
        .with_state(state);

    let mut router = Router::new()
        .merge(health_routes)
        .merge(workflow_routes)
        .merge(item_routes)
        .merge(task_routes);

    // Database routes exist only on the Postgres store
    if let Some(db_pool) = db_pool {
        let database_routes = Router::new()
            .route("/api/db/init", post(handlers::database::init_database))
            .route(
                "/api/db/validate",
                get(handlers::database::validate_database),
            )
            .with_state(db_pool);
        router = router.merge(database_routes);
    }

    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    )
}

/// Connect to NATS if configured.
async fn connect_nats(config: &AppConfig) -> Option<async_nats::Client> {
    if let Some(ref nats_url) = config.nats_url {
        match async_nats::connect(nats_url).await {
            Ok(client) => {
                tracing::info!(url = %nats_url, "Connected to NATS");
                Some(client)
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %nats_url, "Failed to connect to NATS, continuing without it");
                None
            }
        }
    } else {
        tracing::info!("NATS not configured, notifications go to the log");
        None
    }
}

/// Open the configured store. Applies the schema on a fresh database.
async fn open_store(config: &AppConfig) -> anyhow::Result<(Arc<dyn WorkflowStore>, Option<DbPool>)> {
    match config.store {
        StoreKind::Memory => {
            tracing::warn!("Using the in-memory store, state is lost on restart");
            Ok((Arc::new(MemoryStore::new()), None))
        }
        StoreKind::Postgres => {
            let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load database config, using defaults");
                DatabaseConfig::default()
            });
            let db_pool = create_pool(&db_config).await?;

            let missing = schema::missing_tables(&db_pool).await?;
            if !missing.is_empty() {
                tracing::info!(missing = ?missing, "Creating missing tables");
                schema::apply_schema(&db_pool).await?;
            }

            Ok((Arc::new(PgStore::new(db_pool.clone())), Some(db_pool)))
        }
    }
}

async fn build_notifier(
    config: &AppConfig,
    nats_client: Option<&async_nats::Client>,
) -> Arc<dyn Notifier> {
    let Some(client) = nats_client else {
        return Arc::new(LogNotifier);
    };
    match NatsNotifier::new(client.clone(), config.notify_subject.as_deref(), None).await {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            tracing::warn!(error = %e, "NATS notifier unavailable, falling back to the log");
            Arc::new(LogNotifier)
        }
    }
}

fn load_roles(config: &AppConfig) -> anyhow::Result<StaticRoleSource> {
    match config.roles_file {
        Some(ref path) => Ok(StaticRoleSource::from_file(path).log("loading roles file")?),
        None => {
            tracing::warn!("REVIEWFLOW_ROLES_FILE not set, every group is empty");
            Ok(StaticRoleSource::default())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting ReviewFlow server"
    );

    let app_config = AppConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load app config, using defaults");
        AppConfig::default()
    });

    tracing::info!(
        host = %app_config.host,
        port = app_config.port,
        store = ?app_config.store,
        definitions_dir = %app_config.definitions_dir,
        "Configuration loaded"
    );

    let actions = ActionRegistry::with_builtins();
    let registry = DefinitionRegistry::load_dir(&app_config.definitions_dir, actions.kinds())
        .log("loading workflow definitions")?;

    let roles = RoleResolver::new(Arc::new(load_roles(&app_config)?), &app_config.admin_group);
    let (store, db_pool) = open_store(&app_config).await?;

    let nats_client = connect_nats(&app_config).await;
    let notifier = build_notifier(&app_config, nats_client.as_ref()).await;

    let curation = match app_config.curation_mode {
        CurationMode::Completed => CurationResult::Completed,
        CurationMode::Queued => CurationResult::Queued,
    };

    let engine = WorkflowEngine::builder(Arc::new(registry), store)
        .roles(roles)
        .actions(Arc::new(actions))
        .curator(Arc::new(ConfiguredCurator::new(curation)))
        .notifier(notifier)
        .build();

    let state = AppState::new(engine, app_config.clone(), db_pool.clone(), nats_client);
    let app = build_router(state, db_pool);

    let addr: SocketAddr = app_config.bind_address().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
