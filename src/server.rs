//! HTTP surface: the thin axum router mapping the Simple API paths onto the
//! aggregate cache.

use crate::cache::Cache;
use crate::file_cache::Fetched;
use crate::index::IndexError;
use crate::models;
use crate::negotiate::{
    ContentKind, JSON_V1, NotAcceptable, compress, negotiate_content, negotiate_encoding,
};
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{delete, get};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    pub cache: Cache,
    /// Serve cached files as `application/octet-stream` instead of guessing.
    pub binary_file_mime_type: bool,
}

#[derive(Debug)]
enum ApiError {
    NotFound,
    Upstream(String),
    NotAcceptable,
    Internal(String),
}

impl From<IndexError> for ApiError {
    fn from(value: IndexError) -> Self {
        match value {
            IndexError::NotFound(_) => Self::NotFound,
            IndexError::Upstream(message) => Self::Upstream(message),
            IndexError::Url(message) => Self::Upstream(message),
        }
    }
}

impl From<NotAcceptable> for ApiError {
    fn from(_: NotAcceptable) -> Self {
        Self::NotAcceptable
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "not found").into_response(),
            Self::Upstream(message) => {
                error!("upstream failure: {message}");
                (StatusCode::BAD_GATEWAY, "upstream index failure").into_response()
            }
            Self::NotAcceptable => {
                (StatusCode::NOT_ACCEPTABLE, "not acceptable").into_response()
            }
            Self::Internal(message) => {
                error!("internal error: {message}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct FormatQuery {
    format: Option<String>,
}

/// Build the negotiated index response: pick the representation, compress,
/// and stamp `Vary`.
fn negotiated(
    headers: &HeaderMap,
    format: Option<&str>,
    html: impl FnOnce() -> Vec<u8>,
    json: impl FnOnce() -> Result<Vec<u8>, serde_json::Error>,
) -> Result<Response, ApiError> {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok());
    let kind = negotiate_content(accept, format)?;
    let (body, content_type) = match kind {
        ContentKind::Html => (html(), "text/html; charset=utf-8"),
        ContentKind::Json => (
            json().map_err(|err| ApiError::Internal(err.to_string()))?,
            JSON_V1,
        ),
    };

    let accept_encoding = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok());
    let encoding = negotiate_encoding(accept_encoding)?;
    let body =
        compress(&body, encoding).map_err(|err| ApiError::Internal(err.to_string()))?;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::VARY, "Accept, Accept-Encoding");
    if let Some(value) = encoding.header_value() {
        response = response.header(header::CONTENT_ENCODING, value);
    }
    response
        .body(Body::from(body))
        .map_err(|err| ApiError::Internal(err.to_string()))
}

async fn home() -> Response {
    axum::response::Html(
        "<!DOCTYPE html>\n<html>\n  <body>\n    <a href=\"/index/\">package index</a>\n  \
         </body>\n</html>\n",
    )
    .into_response()
}

async fn list_projects(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FormatQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let names = state.cache.list_projects().await?;
    negotiated(
        &headers,
        query.format.as_deref(),
        || models::render_project_list_html(&names).into_bytes(),
        || serde_json::to_vec(&models::render_project_list_json(&names)),
    )
}

async fn list_files(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    Query(query): Query<FormatQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let files = state.cache.list_files(&project).await?;
    negotiated(
        &headers,
        query.format.as_deref(),
        || models::render_project_detail_html(&project, &files).into_bytes(),
        || serde_json::to_vec(&models::render_project_detail_json(&project, &files)),
    )
}

/// Extension-based content type for cached files.
fn content_type_for(filename: &str) -> &'static str {
    let lowered = filename.to_ascii_lowercase();
    if lowered.ends_with(".tar.gz") || lowered.ends_with(".tgz") || lowered.ends_with(".gz") {
        "application/gzip"
    } else if lowered.ends_with(".whl") || lowered.ends_with(".zip") || lowered.ends_with(".egg") {
        "application/zip"
    } else if lowered.ends_with(".metadata") || lowered.ends_with(".asc") {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

async fn get_file(
    State(state): State<Arc<AppState>>,
    Path((project, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    match state.cache.get_file(&project, &filename).await? {
        Fetched::Local(path) => {
            // Evicted between resolution and open: behave like a miss that
            // the client can retry upstream.
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|_| ApiError::NotFound)?;
            let content_type = if state.binary_file_mime_type {
                "application/octet-stream"
            } else {
                content_type_for(&filename)
            };
            let mut response = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type);
            if let Ok(metadata) = file.metadata().await {
                response = response.header(header::CONTENT_LENGTH, metadata.len());
            }
            response
                .body(Body::from_stream(ReaderStream::new(file)))
                .map_err(|err| ApiError::Internal(err.to_string()))
        }
        Fetched::Upstream(url) => Ok(Redirect::temporary(&url).into_response()),
    }
}

fn success_body() -> Json<serde_json::Value> {
    Json(json!({"status": "success", "data": null}))
}

async fn invalidate_list(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.cache.invalidate_list().await;
    success_body()
}

async fn invalidate_project(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Json<serde_json::Value> {
    state.cache.invalidate_project(&project).await;
    success_body()
}

async fn health() -> Json<serde_json::Value> {
    success_body()
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/index/", get(list_projects))
        .route("/index/{project}/", get(list_files))
        .route("/index/{project}/{filename}", get(get_file))
        .route("/cache/list", delete(invalidate_list))
        .route("/cache/{project}", delete(invalidate_project))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and start serving in the background.
///
/// Returns the bound address (useful when `port` is 0).
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
) -> std::io::Result<SocketAddr> {
    let app = router(state);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(std::io::Error::other)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("server listening on {actual_addr}");

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!("server error: {err}");
        }
    });

    Ok(actual_addr)
}
