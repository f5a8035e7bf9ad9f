use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use minijinja::{context, path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gemini::{GatewayError, ImageQuality, VideoDuration};
use crate::modal::{ModalKind, ModalRouter};
use crate::orchestrator::{ChatOrchestrator, TurnError};
use crate::session::Theme;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<ChatOrchestrator>,
    modals: Arc<ModalRouter>,
    templates: Arc<AutoReloader>,
}

fn create_minijinja_env() -> Result<AutoReloader> {
    // AutoReloader keeps template edits visible without a restart.
    let reloader = AutoReloader::new(|notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader("templates"));
        notifier.watch_path("templates", true);
        Ok(env)
    });
    Ok(reloader)
}

/// JSON error body with a status code; modal flows render `error` as an
/// alert in the front end.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<TurnError> for ApiError {
    fn from(e: TurnError) -> Self {
        ApiError::new(StatusCode::CONFLICT, e.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::EntityNotFound(_) => ApiError::new(
                StatusCode::BAD_GATEWAY,
                "The model was not found. Make sure your API key has access to the preview models.",
            ),
            other => {
                error!("Generation failed: {}", other);
                ApiError::new(
                    StatusCode::BAD_GATEWAY,
                    "Generation failed. Please try again.",
                )
            }
        }
    }
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let sessions = state.orchestrator.sessions().await;
    let active = state.orchestrator.active_session().await;
    let theme = state.orchestrator.theme().await;
    let modal = state.modals.current();

    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                tmpl.render(context! {
                    title => "ChatHDI",
                    theme => theme,
                    sessions => sessions,
                    active_session => active,
                    modal => modal,
                })
            })
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to render index template: {}", e);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "template error")
        })
}

// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Forward broadcast UI events to this client until it disconnects.
/// Inbound frames are ignored; all mutations go through the JSON API.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("New WebSocket connection established");
    let mut events = state.orchestrator.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(payload) => payload,
                            Err(e) => {
                                error!("Failed to serialize UI event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(WsMessage::Text(payload)).await.is_err() {
                            warn!("WebSocket client disconnected on send");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("WebSocket client lagged, skipped {} events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
    info!("WebSocket connection closed");
}

#[derive(Deserialize)]
struct ChatRequest {
    session_id: Option<Uuid>,
    text: String,
}

#[derive(Serialize)]
struct SessionsResponse {
    sessions: Vec<crate::session::ChatSession>,
    active_session_id: Option<Uuid>,
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "empty message"));
    }
    let session_id = state.orchestrator.send_message(req.session_id, text).await?;
    Ok(Json(json!({ "session_id": session_id })))
}

async fn list_sessions_handler(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.orchestrator.sessions().await,
        active_session_id: state.orchestrator.active().await,
    })
}

async fn create_session_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let id = state.orchestrator.create_session().await;
    Json(json!({ "session_id": id }))
}

async fn activate_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.orchestrator.set_active(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(StatusCode::NOT_FOUND, "unknown session"))
    }
}

#[derive(Deserialize)]
struct ModalOpenRequest {
    kind: ModalKind,
}

async fn modal_open_handler(
    State(state): State<AppState>,
    Json(req): Json<ModalOpenRequest>,
) -> StatusCode {
    state.modals.open(req.kind);
    StatusCode::NO_CONTENT
}

async fn modal_close_handler(State(state): State<AppState>) -> StatusCode {
    state.modals.close();
    StatusCode::NO_CONTENT
}

fn require_open(modals: &ModalRouter, kind: ModalKind) -> Result<(), ApiError> {
    if modals.current() == Some(kind) {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::CONFLICT, "modal is not open"))
    }
}

#[derive(Deserialize)]
struct ImageSubmit {
    prompt: String,
    quality: ImageQuality,
}

async fn image_submit_handler(
    State(state): State<AppState>,
    Json(req): Json<ImageSubmit>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_open(&state.modals, ModalKind::Image)?;
    let produced = state
        .orchestrator
        .create_image_message(&req.prompt, req.quality)
        .await?;
    if produced {
        state.modals.close();
        Ok(Json(json!({ "ok": true })))
    } else {
        // Not an error: the modal stays open so the user can adjust the
        // prompt and retry.
        Ok(Json(json!({ "ok": false, "reason": "no media produced" })))
    }
}

#[derive(Deserialize)]
struct VideoSubmit {
    prompt: String,
    duration: VideoDuration,
}

async fn video_submit_handler(
    State(state): State<AppState>,
    Json(req): Json<VideoSubmit>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_open(&state.modals, ModalKind::Video)?;
    let cancel = CancellationToken::new();
    let produced = state
        .orchestrator
        .create_video_message(&req.prompt, req.duration, &cancel)
        .await?;
    if produced {
        state.modals.close();
        Ok(Json(json!({ "ok": true })))
    } else {
        Ok(Json(json!({ "ok": false, "reason": "no media produced" })))
    }
}

#[derive(Deserialize)]
struct SlidesSubmit {
    topic: String,
    slide_count: u32,
}

async fn slides_submit_handler(
    State(state): State<AppState>,
    Json(req): Json<SlidesSubmit>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_open(&state.modals, ModalKind::Slides)?;
    let produced = state
        .orchestrator
        .create_slides_message(&req.topic, req.slide_count)
        .await?;
    if produced {
        state.modals.close();
        Ok(Json(json!({ "ok": true })))
    } else {
        Ok(Json(json!({ "ok": false, "reason": "outline was empty" })))
    }
}

async fn clear_history_handler(
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    if !state.modals.take_if(ModalKind::ClearHistory) {
        return Err(ApiError::new(StatusCode::CONFLICT, "modal is not open"));
    }
    state.orchestrator.clear_all().await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ThemeRequest {
    theme: Theme,
}

async fn theme_handler(
    State(state): State<AppState>,
    Json(req): Json<ThemeRequest>,
) -> StatusCode {
    state.orchestrator.set_theme(req.theme).await;
    StatusCode::NO_CONTENT
}

pub async fn start_web_server(
    port: u16,
    orchestrator: Arc<ChatOrchestrator>,
    media_dir: PathBuf,
) -> Result<()> {
    let templates = create_minijinja_env().context("Failed to initialize template engine")?;

    let state = AppState {
        orchestrator,
        modals: Arc::new(ModalRouter::new()),
        templates: Arc::new(templates),
    };

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/api/chat", post(chat_handler))
        .route(
            "/api/sessions",
            get(list_sessions_handler).post(create_session_handler),
        )
        .route("/api/sessions/:id/activate", post(activate_session_handler))
        .route("/api/modal/open", post(modal_open_handler))
        .route("/api/modal/close", post(modal_close_handler))
        .route("/api/modal/image", post(image_submit_handler))
        .route("/api/modal/video", post(video_submit_handler))
        .route("/api/modal/slides", post(slides_submit_handler))
        .route("/api/modal/clear-history", post(clear_history_handler))
        .route("/api/theme", post(theme_handler))
        .nest_service("/static", ServeDir::new("static"))
        .nest_service("/media", ServeDir::new(media_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
