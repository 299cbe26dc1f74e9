//! TutorForge API Gateway
//!
//! The entry point for the learning platform.
//! Handles:
//! - Starting tutor chat pipeline runs in the background
//! - Cancelling runs
//! - Listing registered models
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tutorforge_common::{
    config::{AppConfig, ObservabilityConfig},
    llm::ModelRegistry,
    metrics,
    retrieval::{CohereReranker, WeaviateStore},
    TutorChatPipeline,
};
use uuid::Uuid;

/// Cancellation handles of in-flight runs
pub type RunRegistry = Arc<RwLock<HashMap<Uuid, CancellationToken>>>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
    pub pipeline: Arc<TutorChatPipeline>,
    pub runs: RunRegistry,
    /// Parent of every run token; cancelled on shutdown
    pub shutdown: CancellationToken,
    /// Spawned runs, drained before the process exits
    pub tasks: TaskTracker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    init_tracing(&config.observability);
    info!("Starting TutorForge API Gateway v{}", tutorforge_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets_for_metric(
                Matcher::Full(format!("{}_request_duration_seconds", metrics::METRICS_PREFIX)),
                metrics::LATENCY_BUCKETS,
            )?
            .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), metrics::PIPELINE_BUCKETS)?
            .install()?;
        info!("Metrics exporter listening on {}", addr);
    }
    metrics::register_metrics();

    // Build models and retrieval backends
    let registry = Arc::new(ModelRegistry::from_config(&config)?);
    let store = Arc::new(WeaviateStore::new(&config.retrieval)?);
    let reranker = Arc::new(CohereReranker::new(&config.rerank)?);
    let pipeline = Arc::new(TutorChatPipeline::new(registry.clone(), store, reranker, &config));

    let state = AppState {
        config: config.clone(),
        registry,
        pipeline,
        runs: Arc::new(RwLock::new(HashMap::new())),
        shutdown: CancellationToken::new(),
        tasks: TaskTracker::new(),
    };
    let shutdown = state.shutdown.clone();
    let tasks = state.tasks.clone();

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    // Let cancelled runs deliver their final status
    tasks.close();
    if tokio::time::timeout(config.shutdown_timeout(), tasks.wait()).await.is_err() {
        warn!(pending = tasks.len(), "Shutdown timeout reached with runs still in flight");
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        .route("/models", get(handlers::models::list_models))
        .route("/pipelines/tutor-chat/run", post(handlers::pipelines::run_tutor_chat))
        .route("/pipelines/runs/{id}", delete(handlers::pipelines::cancel_run));

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", api_routes)
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;
    use tutorforge_common::config::{ModelConfig, ProviderConfig};
    use tutorforge_common::llm::{CapabilitySet, ModelKind};

    fn state() -> AppState {
        let mut config = AppConfig::default();
        config.models.push(ModelConfig {
            id: "local".to_string(),
            name: "Local".to_string(),
            description: String::new(),
            provider: ProviderConfig {
                kind: "mock".to_string(),
                base_url: None,
                api_key: None,
                model: "mock".to_string(),
                kinds: vec![ModelKind::Chat, ModelKind::Embedding],
                timeout_secs: 5,
            },
            capabilities: CapabilitySet::default(),
        });
        // Unroutable store so retrieval fails fast and is skipped
        config.retrieval.url = "http://127.0.0.1:9".to_string();

        let registry = Arc::new(ModelRegistry::from_config(&config).unwrap());
        let store = Arc::new(WeaviateStore::new(&config.retrieval).unwrap());
        let reranker = Arc::new(CohereReranker::new(&config.rerank).unwrap());
        let pipeline = Arc::new(TutorChatPipeline::new(registry.clone(), store, reranker, &config));

        AppState {
            config: Arc::new(config),
            registry,
            pipeline,
            runs: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = create_router(state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_list_models() {
        let response = create_router(state())
            .oneshot(Request::get("/api/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body[0]["id"], "local");
        assert_eq!(body[0]["kinds"], serde_json::json!(["chat", "embedding"]));
    }

    #[tokio::test]
    async fn test_run_is_accepted_and_registered() {
        let state = state();
        let request = Request::post("/api/v1/pipelines/tutor-chat/run")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message": "What is recursion?"}"#))
            .unwrap();

        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let run_id = json_body(response).await["run_id"].as_str().unwrap().to_string();
        let run_id = Uuid::parse_str(&run_id).unwrap();
        assert!(state.runs.read().await.contains_key(&run_id));
        assert_eq!(state.tasks.len(), 1);

        // Finished runs leave the registry
        state.tasks.close();
        tokio_test::assert_ok!(tokio::time::timeout(Duration::from_secs(10), state.tasks.wait()).await);
        assert!(state.runs.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_delivers_cancelled_status() {
        let received: Arc<std::sync::Mutex<Vec<serde_json::Value>>> = Arc::default();
        let sink = received.clone();
        let callback = Router::new().route(
            "/status",
            post(move |axum::Json(body): axum::Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(body);
                    StatusCode::OK
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, callback).await.unwrap() });

        let state = state();
        let body = serde_json::json!({
            "message": "What is a stack frame?",
            "callback": {"url": format!("http://{}/status", addr), "token": "secret"}
        });
        let request = Request::post("/api/v1/pipelines/tutor-chat/run")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        state.shutdown.cancel();
        state.tasks.close();
        tokio_test::assert_ok!(tokio::time::timeout(Duration::from_secs(10), state.tasks.wait()).await);

        let last = received.lock().unwrap().last().cloned().unwrap();
        let stages = last["stages"].as_array().unwrap();
        assert!(stages
            .iter()
            .any(|stage| stage["state"] == "ERROR" && stage["message"] == "cancelled"));
        assert!(state.runs.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let request = Request::post("/api/v1/pipelines/tutor-chat/run")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message": ""}"#))
            .unwrap();

        let response = create_router(state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_is_not_found() {
        let uri = format!("/api/v1/pipelines/runs/{}", Uuid::new_v4());
        let response = create_router(state())
            .oneshot(Request::delete(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_fires_run_token() {
        let state = state();
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        state.runs.write().await.insert(id, token.clone());

        let uri = format!("/api/v1/pipelines/runs/{}", id);
        let response = create_router(state.clone())
            .oneshot(Request::delete(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(token.is_cancelled());
    }
}
