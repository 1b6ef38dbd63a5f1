use anyhow::{Context, Result};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
        request::Parts,
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::chat::{ChatError, ChatService};
use crate::constants::SESSION_COOKIE;
use crate::transcript::SessionId;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    chat: Arc<ChatService>,
}

impl AppState {
    pub fn new(chat: Arc<ChatService>, template_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env(template_dir.into())),
            chat,
        }
    }
}

// Minijinja Environment setup
fn create_minijinja_env(template_dir: PathBuf) -> AutoReloader {
    // Use AutoReloader so template edits show up without a restart
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&template_dir));
        notifier.watch_path(&template_dir, true);
        Ok(env)
    })
}

/// Body of `POST /data`.
#[derive(Debug, Deserialize)]
struct DataRequest {
    data: Option<String>,
}

/// Envelope returned by the chat endpoints.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub response: bool,
    pub message: String,
}

impl ChatResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            response: true,
            message: message.into(),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        // Upstream and playback failures keep a 200 so the page shows the message.
        let status = match &self {
            ChatError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::Upstream(_) | ChatError::Playback(_) => StatusCode::OK,
            ChatError::TranscriptLog(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ChatResponse {
            response: false,
            message: format!("Error: {}", self),
        };
        (status, Json(body)).into_response()
    }
}

/// Session of the caller, taken from the session cookie or newly issued.
#[derive(Debug, Clone, Copy)]
struct Session {
    id: SessionId,
    is_new: bool,
}

impl Session {
    /// Attaches the session cookie to responses for new sessions.
    fn finish(self, response: impl IntoResponse) -> Response {
        let mut response = response.into_response();
        if self.is_new {
            let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, self.id);
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().insert(SET_COOKIE, value);
                }
                Err(e) => error!("Failed to build session cookie: {}", e),
            }
        }
        response
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(match session_from_headers(&parts.headers) {
            Some(id) => Session { id, is_new: false },
            None => Session {
                id: SessionId::new(),
                is_new: true,
            },
        })
    }
}

fn session_from_headers(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| SessionId::parse(value))
}

async fn index_handler(State(state): State<AppState>) -> Response {
    // Acquire env, get template, and render within the same block
    let rendered = state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                tmpl.render(minijinja::context! {
                    title => "tunechat",
                })
            })
        });

    match rendered {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Failed to get or render template: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", e)),
            )
                .into_response()
        }
    }
}

async fn data_handler(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<DataRequest>, JsonRejection>,
) -> Response {
    let response = match handle_data(&state, session.id, payload).await {
        Ok(message) => Json(ChatResponse::ok(message)).into_response(),
        Err(e) => {
            warn!(session = %session.id, error = %e, "Chat request failed");
            e.into_response()
        }
    };
    session.finish(response)
}

async fn handle_data(
    state: &AppState,
    session: SessionId,
    payload: Result<Json<DataRequest>, JsonRejection>,
) -> Result<String, ChatError> {
    let Json(request) = payload.map_err(|e| ChatError::MalformedRequest(e.body_text()))?;
    let text = request
        .data
        .ok_or_else(|| ChatError::MalformedRequest("missing \"data\" field".to_string()))?;
    state.chat.send(session, &text).await
}

async fn history_handler(State(state): State<AppState>, session: Session) -> Response {
    session.finish(Json(state.chat.history(session.id).await))
}

async fn clear_handler(State(state): State<AppState>, session: Session) -> Response {
    let response = match state.chat.clear(session.id).await {
        Ok(()) => Json(ChatResponse::ok("Chat history cleared.")).into_response(),
        Err(e) => {
            error!(session = %session.id, error = %e, "Failed to clear chat history");
            e.into_response()
        }
    };
    session.finish(response)
}

async fn save_handler(State(state): State<AppState>, session: Session) -> Response {
    let response = match state.chat.save(session.id).await {
        Ok(()) => Json(ChatResponse::ok("Chat history saved.")).into_response(),
        Err(e) => {
            error!(session = %session.id, error = %e, "Failed to save chat history");
            e.into_response()
        }
    };
    session.finish(response)
}

/// Builds the application router.
pub fn build_router(state: AppState, static_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/", get(index_handler))
        .route("/data", post(data_handler))
        .route("/history", get(history_handler))
        .route("/clear", post(clear_handler))
        .route("/save", post(save_handler))
        .nest_service("/static", ServeDir::new(static_dir))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http()) // Add request logging
                .layer(cors),
        )
}

pub async fn start_web_server(addr: SocketAddr, app: Router) -> Result<()> {
    // Bind using tokio::net::TcpListener
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;
    info!("Running on http://{}", listener.local_addr()?);

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, initiating shutdown...");
            }
        })
        .await
        .context("Web server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_from_headers() {
        let id = SessionId::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {}={}", SESSION_COOKIE, id)).unwrap(),
        );
        assert_eq!(session_from_headers(&headers), Some(id));
    }

    #[test]
    fn test_session_from_headers_rejects_garbage() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_from_headers(&headers), None);
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{}=nope", SESSION_COOKIE)).unwrap(),
        );
        assert_eq!(session_from_headers(&headers), None);
    }

    #[test]
    fn test_new_session_sets_cookie() {
        let session = Session {
            id: SessionId::new(),
            is_new: true,
        };
        let response = session.finish(StatusCode::OK);
        let cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with(&format!("{}={}", SESSION_COOKIE, session.id)));

        let existing = Session {
            is_new: false,
            ..session
        };
        assert!(existing.finish(StatusCode::OK).headers().get(SET_COOKIE).is_none());
    }
}
