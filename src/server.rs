//! HTTP server exposing the configured chat model.
//!
//! All model routes live under one prefix (`[server].path`, default
//! `/llm`). Request and response bodies follow the invoke / batch / stream
//! conventions used by runnable-serving frameworks, so any compatible
//! client (including [`crate::client::RemoteRunnable`]) can talk to it.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Redirect to the playground |
//! | `POST` | `{prefix}/invoke` | `{input}` → `{output, metadata}` |
//! | `POST` | `{prefix}/batch` | `{inputs}` → `{output: [..], metadata}` |
//! | `POST` | `{prefix}/stream` | `{input}` → server-sent events |
//! | `GET`  | `{prefix}/input_schema` | JSON schema of `input` |
//! | `GET`  | `{prefix}/output_schema` | JSON schema of `output` |
//! | `GET`  | `{prefix}/playground` | Browser playground |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! invoke, batch and stream are also reachable under
//! `{prefix}/c/{config_hash}/`; the hash is accepted and ignored.
//!
//! # Stream events
//!
//! ```text
//! event: metadata   data: {"run_id": "..."}
//! event: data       data: "<fragment>"        (one per fragment)
//! event: end
//! ```
//!
//! A model failure after the stream has started is reported as
//! `event: error` with `{"status_code": 500, "message": "..."}` and no
//! `end` event follows.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "model_error", "message": "API error: 404 - model not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `model_error` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted and all response
//! headers are exposed.

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Redirect, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::config::Config;
use crate::llm::{create_model, ChatModel, FragmentStream, ModelError, ModelInput};

const PLAYGROUND_HTML: &str = include_str!("playground.html");

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    model: Arc<dyn ChatModel>,
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind`, mounts the model routes under
/// `[server].path` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let model = create_model(&config.model)?;
    let app = build_router(model.clone(), &config.server.path);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    let addr = listener.local_addr()?;

    tracing::info!(model = model.name(), %addr, "server started");
    println!(
        "Serving {} on http://{}{}/playground",
        model.name(),
        addr,
        config.server.path.trim_end_matches('/')
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router for `model` with its routes under `path`.
pub fn build_router(model: Arc<dyn ChatModel>, path: &str) -> Router {
    let prefix = path.trim_end_matches('/').to_string();
    let playground = format!("{}/playground", prefix);

    let runnable = || {
        Router::new()
            .route("/invoke", post(handle_invoke))
            .route("/batch", post(handle_batch))
            .route("/stream", post(handle_stream))
    };
    let scoped = Router::new()
        .route("/playground", get(handle_playground))
        .route("/input_schema", get(handle_input_schema))
        .route("/output_schema", get(handle_output_schema))
        .merge(runnable())
        .nest("/c/{config_hash}", runnable());

    let app = Router::new().route(
        "/",
        get(move || {
            let target = playground.clone();
            async move { Redirect::temporary(&target) }
        }),
    );
    let app = if prefix.is_empty() {
        app.merge(scoped)
    } else {
        app.nest(&prefix, scoped)
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    app.route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { model })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn model_error(err: ModelError) -> AppError {
    tracing::warn!(error = %err, "model call failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "model_error".to_string(),
        message: err.to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST {prefix}/invoke ============

// `config` and `kwargs` are accepted for compatibility and not read.
#[derive(Deserialize)]
struct InvokeRequest {
    input: ModelInput,
}

#[derive(Serialize)]
struct InvokeResponse {
    output: String,
    metadata: RunMetadata,
}

#[derive(Serialize)]
struct RunMetadata {
    run_id: String,
}

async fn handle_invoke(
    State(state): State<AppState>,
    Json(req): Json<InvokeRequest>,
) -> Result<Json<InvokeResponse>, AppError> {
    let run_id = Uuid::new_v4().to_string();
    tracing::debug!(%run_id, "invoke");
    let output = state
        .model
        .invoke(req.input.into_messages())
        .await
        .map_err(model_error)?;
    Ok(Json(InvokeResponse {
        output,
        metadata: RunMetadata { run_id },
    }))
}

// ============ POST {prefix}/batch ============

#[derive(Deserialize)]
struct BatchRequest {
    inputs: Vec<ModelInput>,
}

#[derive(Serialize)]
struct BatchResponse {
    output: Vec<String>,
    metadata: BatchMetadata,
}

#[derive(Serialize)]
struct BatchMetadata {
    run_ids: Vec<String>,
}

async fn handle_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    if req.inputs.is_empty() {
        return Err(bad_request("inputs must not be empty"));
    }
    let run_ids: Vec<String> = req
        .inputs
        .iter()
        .map(|_| Uuid::new_v4().to_string())
        .collect();
    tracing::debug!(count = run_ids.len(), "batch");

    let calls = req
        .inputs
        .into_iter()
        .map(|input| state.model.invoke(input.into_messages()));
    let output = futures::future::join_all(calls)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map_err(model_error)?;

    Ok(Json(BatchResponse {
        output,
        metadata: BatchMetadata { run_ids },
    }))
}

// ============ POST {prefix}/stream ============

enum Phase {
    Metadata,
    Fragments,
    Done,
}

fn data_event(text: String) -> Event {
    Event::default()
        .event("data")
        .data(serde_json::Value::String(text).to_string())
}

fn error_event(err: &ModelError) -> Event {
    let body = serde_json::json!({ "status_code": 500, "message": err.to_string() });
    Event::default().event("error").data(body.to_string())
}

/// Frame model fragments as metadata, data..., then end or error.
fn stream_events(run_id: String, fragments: FragmentStream) -> impl futures::Stream<Item = Event> {
    futures::stream::unfold(
        (fragments, Phase::Metadata),
        move |(mut fragments, phase)| {
            let run_id = run_id.clone();
            async move {
                match phase {
                    Phase::Metadata => {
                        let body = serde_json::json!({ "run_id": run_id });
                        let event = Event::default().event("metadata").data(body.to_string());
                        Some((event, (fragments, Phase::Fragments)))
                    }
                    Phase::Fragments => match fragments.next().await {
                        Some(Ok(text)) => Some((data_event(text), (fragments, Phase::Fragments))),
                        Some(Err(e)) => {
                            tracing::warn!(%run_id, error = %e, "stream aborted");
                            Some((error_event(&e), (fragments, Phase::Done)))
                        }
                        None => Some((Event::default().event("end"), (fragments, Phase::Done))),
                    },
                    Phase::Done => None,
                }
            }
        },
    )
}

async fn handle_stream(
    State(state): State<AppState>,
    Json(req): Json<InvokeRequest>,
) -> Result<Response, AppError> {
    let run_id = Uuid::new_v4().to_string();
    tracing::debug!(%run_id, "stream");
    let fragments = state
        .model
        .stream(req.input.into_messages())
        .await
        .map_err(model_error)?;

    let events = stream_events(run_id, fragments).map(Ok::<_, Infallible>);
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

// ============ Schemas and playground ============

async fn handle_input_schema() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "title": "LLMInput",
        "anyOf": [
            { "type": "string" },
            { "type": "array", "items": { "$ref": "#/definitions/ChatMessage" } }
        ],
        "definitions": {
            "ChatMessage": {
                "type": "object",
                "properties": {
                    "role": { "enum": ["system", "user", "assistant"] },
                    "content": { "type": "string" }
                },
                "required": ["role", "content"]
            }
        }
    }))
}

async fn handle_output_schema() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "title": "LLMOutput", "type": "string" }))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

async fn handle_playground(State(state): State<AppState>) -> Html<String> {
    Html(PLAYGROUND_HTML.replace("__MODEL__", &escape_html(state.model.name())))
}
