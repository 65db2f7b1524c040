//! HTTP route handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agents::{AgentContext, AgentMode};
use crate::config::Config;
use crate::keypool::KeyPool;
use crate::llm::{CerebrasClient, LlmClient, Role};
use crate::orchestrator;
use crate::stream::StreamSink;

use super::types::ChatRequest;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// The backend LLM client; boxed so tests can substitute a fake.
    pub client: Arc<dyn LlmClient>,
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        client: Arc::new(CerebrasClient::new()),
        config,
    });

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// Run one chat request.
///
/// Envelope and configuration problems are rejected with an HTTP status
/// here, before the stream opens; once the pipeline is spawned the response
/// is a committed 200 and failures travel as `ERROR` frames instead.
async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    if request.messages.is_empty() {
        return bad_request("messages が空です".to_string());
    }
    if request.messages.last().map(|m| m.role) != Some(Role::User) {
        return bad_request("messages は user ロールで終わる必要があります".to_string());
    }

    let pool = match KeyPool::new(state.config.api_keys.iter().cloned()) {
        Ok(pool) => Arc::new(pool),
        Err(err) => {
            tracing::error!(error = %err, "cannot build key pool");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    };

    let mode = AgentMode::from_id(request.data.agent_mode.as_deref().unwrap_or("standard"));
    let (sink, rx) = StreamSink::channel();
    let ctx = AgentContext::new(
        pool,
        Arc::clone(&state.client),
        sink,
        mode,
        request.messages,
        request.data.enabled_specs(),
        request.data.app_settings.to_app_config(),
        request.data.system_prompt.clone(),
        request.data.total_content_length,
    );
    tokio::spawn(orchestrator::run(ctx));

    let body = Body::from_stream(
        UnboundedReceiverStream::new(rx).map(|line| Ok::<Bytes, Infallible>(Bytes::from(line))),
    );
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}
