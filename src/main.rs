use actix_web::{App, HttpServer, middleware::Logger, web};
use dotenv::dotenv;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use cn_gateway::config::{self, AppSettings};
use cn_gateway::config::settings::{CounterBackend, SessionVerifierConfig, SinkBackend};
use cn_gateway::db::connection::{create_pool, verify_connection};
use cn_gateway::db::repositories::{ApiKeyRepository, ApiLogRepository, SystemErrorRepository, SystemEventRepository};
use cn_gateway::error::AppError;
use cn_gateway::gateway::Gateway;
use cn_gateway::handlers;
use cn_gateway::middleware::{
    AdmissionController, AuthValidator, CounterStore, MemoryCounterStore, RedisCounterStore,
    start_memory_store_cleanup_task,
};
use cn_gateway::routes::configure_routes;
use cn_gateway::security::ApiKeyHasher;
use cn_gateway::services::auth::{CachedSessionVerifier, JwtSessionVerifier, RemoteSessionVerifier, SessionVerifier};
use cn_gateway::services::{
    AuditLogger, AuditStore, EventRecorder, EventSink, LogAuditStore, LogEventSink, PostgresAuditStore,
    PostgresEventSink,
};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

fn exit_on_error<T>(result: Result<T, AppError>, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            log::error!("{}: {}", what, e);
            log::error!("Cannot start server without a working {}", what.to_lowercase());
            std::process::exit(1);
        }
    }
}

async fn build_counter_store(settings: &AppSettings) -> Result<Arc<dyn CounterStore>, AppError> {
    match &settings.rate_limit.backend {
        CounterBackend::Redis { url } => Ok(Arc::new(RedisCounterStore::connect(url).await?)),
        CounterBackend::Memory { capacity } => {
            log::warn!("Using in-memory rate limit counters; limits are not shared across instances");
            let store = Arc::new(MemoryCounterStore::new(*capacity));
            start_memory_store_cleanup_task(store.clone(), CLEANUP_INTERVAL);
            Ok(store)
        }
    }
}

fn build_session_verifier(settings: &AppSettings) -> Result<Arc<dyn SessionVerifier>, AppError> {
    let inner: Arc<dyn SessionVerifier> = match &settings.auth.session_verifier {
        SessionVerifierConfig::Remote { url, anon_key } => Arc::new(
            RemoteSessionVerifier::new(url, anon_key)
                .map_err(|e| AppError::Configuration(format!("Failed to build identity client: {}", e)))?,
        ),
        SessionVerifierConfig::Jwt { secret, audience } => Arc::new(JwtSessionVerifier::new(secret, audience)),
    };

    let cached = Arc::new(CachedSessionVerifier::new(
        inner,
        Duration::from_secs(settings.auth.session_cache_ttl_secs),
        settings.auth.session_cache_capacity,
    ));
    cached.clone().spawn_cleanup_task(CLEANUP_INTERVAL);
    Ok(cached)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let app_settings = exit_on_error(config::init_config(), "Application settings");

    // Database connection setup
    let db_pool = exit_on_error(create_pool(&app_settings.database).await, "Database connection");
    exit_on_error(verify_connection(&db_pool).await, "Database connection");
    log::info!("Database connection established successfully");

    let counter_store = exit_on_error(build_counter_store(&app_settings).await, "Rate limit store");
    let session_verifier = exit_on_error(build_session_verifier(&app_settings), "Session verifier");
    let registry = exit_on_error(handlers::build_registry(&app_settings), "Handler registry");
    log::info!("Serving endpoints: {}", registry.paths().join(", "));

    let audit_store: Arc<dyn AuditStore> = match app_settings.audit.backend {
        SinkBackend::Postgres => Arc::new(PostgresAuditStore::new(
            ApiLogRepository::new(db_pool.clone()),
            SystemErrorRepository::new(db_pool.clone()),
        )),
        SinkBackend::Log => Arc::new(LogAuditStore),
    };
    let event_sink: Arc<dyn EventSink> = match app_settings.audit.event_backend {
        SinkBackend::Postgres => Arc::new(PostgresEventSink::new(SystemEventRepository::new(db_pool.clone()))),
        SinkBackend::Log => Arc::new(LogEventSink),
    };
    let (audit, audit_worker) = AuditLogger::start(audit_store, &app_settings.audit);
    let (events, event_worker) =
        EventRecorder::start(event_sink, app_settings.app.name.clone(), app_settings.audit.event_queue_capacity);

    let auth = AuthValidator::new(
        Some(session_verifier),
        Arc::new(ApiKeyRepository::new(db_pool.clone())),
        ApiKeyHasher::new(app_settings.auth.api_key_hash_secret.clone()),
        app_settings.auth.api_key_prefix.clone(),
    );
    let admission = AdmissionController::new(counter_store, app_settings.rate_limit.clone());

    let gateway = web::Data::new(Gateway::new(
        auth,
        admission,
        audit.clone(),
        events.clone(),
        registry,
        app_settings.server.path_prefix.clone(),
    )
    .with_max_body_bytes(app_settings.server.max_body_bytes)
    .with_trusted_proxy_hops(app_settings.server.trusted_proxy_hops));

    let host = &app_settings.server.host;
    let port = app_settings.server.port;

    log::info!("Starting server at http://{}:{}", host, port);

    let listener = TcpListener::bind(format!("{}:{}", host, port))?;

    let result = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(gateway.clone())
            .configure(configure_routes)
    })
    .listen(listener)?
    .run()
    .await;

    // Drain whatever the background queues still hold before exiting.
    log::info!("Server stopped, flushing audit and event queues");
    audit.shutdown();
    events.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        let _ = audit_worker.await;
        let _ = event_worker.await;
    })
    .await;

    result
}
