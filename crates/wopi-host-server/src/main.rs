//! WOPI Host Server - Standalone WOPI host
//!
//! Serves documents from a local directory to a browser-based office editor
//! over the WOPI protocol.

mod config;
mod state;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wopi_host::engine::EngineConfig;
use wopi_host::{
    routes, FileStore, LocalFileStore, LockManager, ProtocolEngine, StaticTokenValidator,
    WopiState,
};

use crate::config::{Config, LogFormat};
use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "wopi-host-server", version, about = "Standalone WOPI host server")]
struct Cli {
    /// Load configuration from a TOML file instead of the environment
    #[arg(long, env = "WOPI_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    init_tracing(config.log_format);
    info!("Starting WOPI Host Server on {}:{}", config.host, config.port);

    let store = Arc::new(LocalFileStore::new(
        &config.documents_dir,
        config.file_extension.clone(),
    ));
    store
        .ensure_root()
        .await
        .with_context(|| format!("Failed to create documents dir {}", config.documents_dir))?;
    store
        .health_check()
        .await
        .context("Documents directory is not usable")?;

    match store.document_count().await {
        Ok(0) => warn!(
            "No .{} documents in {}; add one to open it in the editor",
            config.file_extension, config.documents_dir
        ),
        Ok(count) => info!("Serving {} documents from {}", count, config.documents_dir),
        Err(e) => warn!("Failed to list documents: {}", e),
    }

    let state = build_state(&config, store)?;
    let validator = Arc::new(
        StaticTokenValidator::from_entries(&config.access_tokens)?
            .allow_anonymous(config.anonymous_enabled()),
    );
    if config.anonymous_enabled() {
        warn!("Anonymous access enabled; requests without a known token act as the demo user");
    }
    info!(
        "Loaded {} access tokens, lock ttl {}s",
        validator.token_count(),
        state.engine.locks().ttl().num_seconds()
    );

    let wopi_state = WopiState::new(state.engine.clone(), validator)
        .with_max_upload_bytes(config.max_upload_bytes);
    let app = build_router(state.clone(), wopi_state);

    let shutdown = CancellationToken::new();
    if config.lock_prune_interval_secs > 0 {
        spawn_lock_pruner(
            state.engine.clone(),
            Duration::from_secs(config.lock_prune_interval_secs),
            shutdown.clone(),
        );
    }

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            signal.cancel();
        })
        .await?;
    shutdown.cancel();
    info!("server shutdown complete");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "wopi_host=info,wopi_host_server=info,tower_http=debug".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

fn build_state(config: &Config, store: Arc<LocalFileStore>) -> Result<AppState> {
    let ttl_secs = i64::try_from(config.lock_ttl_secs).context("lock_ttl_secs is too large")?;
    let locks = LockManager::new(chrono::Duration::seconds(ttl_secs));
    let engine_config = EngineConfig {
        file_extension: config.file_extension.clone(),
        owner_id: config.owner_id.clone(),
        post_message_origin: config.post_message_origin.clone(),
        retry_transient_io: config.retry_transient_io,
    };
    let engine = Arc::new(ProtocolEngine::new(store.clone(), locks, engine_config));
    Ok(AppState::new(config.clone(), engine, store))
}

fn build_router(state: AppState, wopi_state: WopiState) -> Router {
    let origins = state.config.cors_origins();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    let public_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(routes::configure(wopi_state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn spawn_lock_pruner(engine: Arc<ProtocolEngine>, every: Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = engine.locks().prune_idle();
                    if removed > 0 {
                        info!("Lock pruner removed {} idle slots", removed);
                    }
                }
            }
        }
    });
}

async fn root(State(state): State<AppState>) -> Html<String> {
    let ext = &state.config.file_extension;
    Html(format!(
        "<html><head><title>WOPI Host Server</title></head><body>\
         <h1>WOPI Host Server</h1>\
         <p>Documents: <code>{dir}</code> (<code>.{ext}</code>)</p>\
         <ul>\
         <li><code>GET /wopi/files/{{id}}</code> CheckFileInfo</li>\
         <li><code>GET /wopi/files/{{id}}/contents</code> GetFile</li>\
         <li><code>POST /wopi/files/{{id}}/contents</code> PutFile</li>\
         <li><code>POST /wopi/files/{{id}}</code> LOCK, UNLOCK, REFRESH_LOCK, GET_LOCK</li>\
         <li><code>GET /health</code> health check</li>\
         </ul></body></html>",
        dir = state.store.root().display(),
        ext = ext,
    ))
}

async fn health_check(State(state): State<AppState>) -> Response {
    let healthy = state.store.health_check().await.is_ok();
    let body = Json(serde_json::json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "service": state.engine.config().owner_id,
        "storage": state.store.backend_name(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }));
    if healthy {
        body.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_app(dir: &TempDir) -> Router {
        let config = Config {
            documents_dir: dir.path().to_string_lossy().to_string(),
            ..Config::default()
        };
        let store = Arc::new(LocalFileStore::new(dir.path(), "docx"));
        let state = build_state(&config, store).unwrap();
        let wopi_state = WopiState::new(
            state.engine.clone(),
            Arc::new(StaticTokenValidator::anonymous()),
        );
        build_router(state, wopi_state)
    }

    #[tokio::test]
    async fn test_health_reports_storage() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "wopi-server");
        assert_eq!(json["storage"], "local");
    }

    #[tokio::test]
    async fn test_health_unavailable_without_root() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        let config = Config::default();
        let store = Arc::new(LocalFileStore::new(&missing, "docx"));
        let state = build_state(&config, store).unwrap();
        let wopi_state = WopiState::new(
            state.engine.clone(),
            Arc::new(StaticTokenValidator::anonymous()),
        );
        let app = build_router(state, wopi_state);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_root_and_wopi_routes_mounted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("report.docx"), b"hello").unwrap();
        let app = test_app(&dir);

        let response = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::get("/wopi/files/report")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["BaseFileName"], "report.docx");
        assert_eq!(json["Size"], 5);
    }
}
