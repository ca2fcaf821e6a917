//! HTTP API for askfiles
//!
//! JSON responses share one envelope: `{success, data?, message?, error?}`.
//! Routes under `/api/files` answer 503 until an API key is configured.

use std::sync::Arc;

use askfiles_core::registry::mask_api_key;
use askfiles_core::{
    normalize_file_ref, ActivationRecord, ChatRequest, Error, FileWithStatus, GenerativeBackend,
    ServiceRegistry,
};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::Instrument;

/// Slack for multipart framing on top of the configured file limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    registry: Arc<ServiceRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }
}

/// Build the application router with CORS and the upload size limit applied.
pub fn build_router(state: AppState) -> Router {
    let server = &state.registry.config().server;
    let body_limit = server.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);
    let cors = cors_layer(&server.cors_origins);

    Router::new()
        .route("/health", get(health))
        .route("/api/files", get(list_files))
        .route("/api/files/upload", post(upload_file))
        .route("/api/files/chat", post(chat))
        .route("/api/files/info/:file_uri", get(file_info))
        .route("/api/files/:file_uri", delete(delete_file))
        .route("/api/files/:file_uri/deactivate", post(deactivate_file))
        .route("/api/files/:file_uri/activate", post(activate_file))
        .route("/api/config/test-key", post(test_key))
        .route("/api/config/status", get(config_status))
        .route("/api/config/usage", get(usage))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.iter().any(|origin| origin == "*") {
        return cors.allow_origin(AllowOrigin::any());
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
}

// ============================================
// Envelope and errors
// ============================================

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    fn data(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: None,
        })
    }

    fn with_message(data: T, message: &str) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: Some(message.to_string()),
        })
    }
}

/// Error returned by handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("file exceeds the {0} byte upload limit")]
    PayloadTooLarge(usize),

    #[error("invalid upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Core(Error::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Core(e) if e.is_caller_error() => StatusCode::BAD_REQUEST,
            ApiError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Multipart(e) => e.status(),
            ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }
        let body = json!({ "success": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn file_id_param(file_uri: &str) -> ApiResult<String> {
    let file_id = normalize_file_ref(file_uri);
    if file_id.is_empty() {
        return Err(ApiError::BadRequest("fileUri is required".to_string()));
    }
    Ok(file_id)
}

// ============================================
// Handlers
// ============================================

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "server running" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    page_size: Option<u32>,
    page_token: Option<String>,
    #[serde(default)]
    include_inactive: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FilePageData {
    files: Vec<FileWithStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    success: bool,
    data: FilePageData,
    count: usize,
    total: usize,
    active: usize,
    inactive: usize,
}

async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>> {
    let assistant = state.registry.require()?;
    let listing = assistant
        .list_with_status(
            query.page_size,
            query.page_token.as_deref(),
            query.include_inactive,
        )
        .await?;

    Ok(Json(ListResponse {
        success: true,
        count: listing.count,
        total: listing.total,
        active: listing.active,
        inactive: listing.inactive,
        data: FilePageData {
            files: listing.files,
            next_page_token: listing.next_page_token,
        },
    }))
}

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let assistant = state.registry.require()?;
    let max_bytes = state.registry.config().server.max_upload_bytes;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await?;
        if bytes.len() > max_bytes {
            return Err(ApiError::PayloadTooLarge(max_bytes));
        }

        let uploaded = assistant
            .upload(bytes.to_vec(), &file_name, &mime_type)
            .await?;
        return Ok(Envelope::with_message(uploaded, "file uploaded"));
    }

    Err(ApiError::BadRequest("no file sent".to_string()))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let assistant = state.registry.require()?;
    let span = tracing::info_span!("chat", request_id = %uuid::Uuid::new_v4());
    let answer = assistant.ask(request).instrument(span).await?;
    Ok(Envelope::data(answer))
}

async fn file_info(
    State(state): State<AppState>,
    Path(file_uri): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let assistant = state.registry.require()?;
    let file = assistant.file_info(&file_id_param(&file_uri)?).await?;
    Ok(Envelope::data(file))
}

async fn delete_file(
    State(state): State<AppState>,
    Path(file_uri): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let assistant = state.registry.require()?;
    let file_id = assistant.delete(&file_id_param(&file_uri)?).await?;
    Ok(Envelope::with_message(json!({ "fileUri": file_id }), "file deleted"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToggleResponse {
    file_uri: String,
    active: bool,
    status: ActivationRecord,
}

impl From<ActivationRecord> for ToggleResponse {
    fn from(record: ActivationRecord) -> Self {
        Self {
            file_uri: record.file_id.clone(),
            active: record.active,
            status: record,
        }
    }
}

/// Toggle on the blocking pool; the table write holds a lock across file I/O.
async fn toggle_activation(
    state: &AppState,
    file_id: String,
    active: bool,
) -> ApiResult<ActivationRecord> {
    let activation = Arc::clone(state.registry.activation());
    let record = tokio::task::spawn_blocking(move || {
        if active {
            activation.reactivate(&file_id)
        } else {
            activation.deactivate(&file_id)
        }
    })
    .await?;
    Ok(record)
}

async fn deactivate_file(
    State(state): State<AppState>,
    Path(file_uri): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.registry.require()?;
    let record = toggle_activation(&state, file_id_param(&file_uri)?, false).await?;
    Ok(Envelope::with_message(ToggleResponse::from(record), "file deactivated"))
}

async fn activate_file(
    State(state): State<AppState>,
    Path(file_uri): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.registry.require()?;
    let record = toggle_activation(&state, file_id_param(&file_uri)?, true).await?;
    Ok(Envelope::with_message(ToggleResponse::from(record), "file reactivated"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestKeyRequest {
    #[serde(default)]
    api_key: String,
}

/// Verify a candidate key with a trivial generation and adopt it on success.
async fn test_key(
    State(state): State<AppState>,
    Json(request): Json<TestKeyRequest>,
) -> ApiResult<impl IntoResponse> {
    let api_key = request.api_key.trim();
    if api_key.is_empty() {
        return Err(ApiError::BadRequest("apiKey is required".to_string()));
    }

    let registry = &state.registry;
    let backend = registry
        .backend_for(api_key)
        .map_err(|e| ApiError::BadRequest(format!("invalid API key: {}", e)))?;

    if let Err(e) = backend
        .generate(registry.default_model(), &[], "test", &[])
        .await
    {
        tracing::warn!(error = %e, "API key verification failed");
        return Err(ApiError::BadRequest(
            "API key is invalid or lacks permissions, check it and try again".to_string(),
        ));
    }

    registry.apply(api_key)?;
    Ok(Json(json!({
        "success": true,
        "message": "API key is valid and has been configured"
    })))
}

async fn config_status(State(state): State<AppState>) -> impl IntoResponse {
    let has_api_key = state.registry.api_key().is_some();
    Envelope::data(json!({
        "hasApiKey": has_api_key,
        "configured": has_api_key,
    }))
}

async fn usage(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let registry = &state.registry;
    let api_key = registry.api_key().ok_or(Error::NotConfigured)?;
    let assistant = registry.require()?;
    let summary = assistant.usage().await;
    let max_mb = registry.config().server.max_upload_bytes / (1024 * 1024);

    Ok(Envelope::data(json!({
        "apiKey": {
            "configured": true,
            "keyPreview": mask_api_key(&api_key),
        },
        "model": {
            "current": summary.current_model,
            "available": summary.available_models,
        },
        "files": summary.files,
        "limits": {
            "rateLimit": {
                "free": "15 RPM",
                "paid": "360 RPM",
                "note": "limits vary by account type",
            },
            "tokenLimit": {
                "input": "1M tokens",
                "output": "8K tokens",
                "note": "limits vary by model",
            },
            "fileLimit": {
                "maxSize": format!("{} MB per file", max_mb),
                "supportedFormats": [
                    "PDF", "TXT", "MD", "DOC", "DOCX", "XLS", "XLSX",
                    "PPT", "PPTX", "JPEG", "PNG", "GIF", "WEBP"
                ],
            },
            "storage": {
                "note": "files are stored by Google",
                "expiration": "uploaded files expire after 48 hours",
            },
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ApiError::Core(Error::NotConfigured), StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::Core(Error::NoFiles), StatusCode::BAD_REQUEST),
            (ApiError::Core(Error::FileInactive("a".into())), StatusCode::BAD_REQUEST),
            (
                ApiError::Core(Error::UnsupportedMediaType("application/zip".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Core(Error::AllModelsUnavailable { last: "503".into() }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::PayloadTooLarge(10), StatusCode::PAYLOAD_TOO_LARGE),
        ];
        for (error, expected) in cases {
            assert_eq!(error.status(), expected, "{}", error);
        }
    }

    #[test]
    fn test_file_id_param() {
        assert_eq!(file_id_param("files/abc").unwrap(), "abc");
        assert!(file_id_param("  ").is_err());
    }

    #[test]
    fn test_envelope_omits_empty_fields() {
        let Json(envelope) = Envelope::data(json!({"x": 1}));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], true);
        assert!(value.get("message").is_none());
    }
}
