//! HTTP API for retrieval and retrieval-augmented answers.
//!
//! # Endpoints
//!
//! | Method   | Path              | Description |
//! |----------|-------------------|-------------|
//! | `POST`   | `/query`          | Retrieve documents; with `rag` also generate an answer |
//! | `POST`   | `/documents`      | Upload a document (not implemented, 501) |
//! | `GET`    | `/documents`      | List documents (not implemented, 501) |
//! | `DELETE` | `/documents/{id}` | Delete a document (not implemented, 501) |
//! | `GET`    | `/health`         | Liveness check |
//!
//! Every route is also served under `/api/v1`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! | Code | Status | Cause |
//! |------|--------|-------|
//! | `bad_request` | 400 | malformed body, empty query, `top_k == 0`, bad paging |
//! | `timeout` | 504 | a collaborator did not answer in time |
//! | `upstream_unavailable` | 502 | a collaborator could not be reached |
//! | `upstream_rejected` | 502 | non-2xx status or non-zero embedded code |
//! | `upstream_error` | 502 | collaborator reply could not be decoded |
//! | `not_implemented` | 501 | document management |
//! | `internal` | 500 | anything else |
//!
//! A failed request never carries partial results.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{DocumentOperation, RagError, SynthesisError};
use crate::models::{Metadata, QueryRequest, QueryResponse};
use crate::rag::{build_pipeline, RagPipeline};

/// Shared state handed to every handler.
#[derive(Clone)]
struct AppState {
    /// Loaded configuration, used by `/health` for the backend name.
    config: Arc<Config>,
    /// Retriever plus chat model, shared by every query.
    pipeline: Arc<RagPipeline>,
}

/// Build the pipeline from `config` and serve until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(build_pipeline(config)?);
    run_server_with_pipeline(config, pipeline).await
}

/// Serve with a caller-supplied pipeline (custom retrievers or chat models).
pub async fn run_server_with_pipeline(
    config: &Config,
    pipeline: Arc<RagPipeline>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(Arc::new(config.clone()), pipeline);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        bind = %bind_addr,
        backend = config.retrieval.backend.as_str(),
        "RAG gateway listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

/// The full application router, with CORS and request tracing.
pub fn router(config: Arc<Config>, pipeline: Arc<RagPipeline>) -> Router {
    let state = AppState { config, pipeline };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let routes = Router::new()
        .route("/query", post(handle_query))
        .route(
            "/documents",
            post(handle_upload_document).get(handle_list_documents),
        )
        .route("/documents/{id}", delete(handle_delete_document))
        .route("/health", get(handle_health));

    Router::new()
        .merge(routes.clone())
        .nest("/api/v1", routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

/// JSON error envelope returned by every failing endpoint.
///
/// ```json
/// { "error": { "code": "bad_request", "message": "query must not be empty" } }
/// ```
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable code such as `bad_request` or `upstream_rejected`.
    code: String,
    /// Human-readable description of what went wrong.
    message: String,
}

/// Handler error: an HTTP status plus the body fields of [`ErrorBody`].
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Build an [`AppError`] with an explicit status and code.
fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

/// 400 `bad_request`, used for input validation failures.
fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

/// Map a pipeline error to its HTTP status and error code.
fn classify_error(err: &RagError) -> AppError {
    let message = err.to_string();
    match err {
        RagError::Network { source, .. } if source.is_timeout() => {
            app_error(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
        }
        RagError::Network { .. } => {
            app_error(StatusCode::BAD_GATEWAY, "upstream_unavailable", message)
        }
        RagError::RemoteRejection { .. } => {
            app_error(StatusCode::BAD_GATEWAY, "upstream_rejected", message)
        }
        RagError::Serialization(_) => app_error(StatusCode::BAD_GATEWAY, "upstream_error", message),
        RagError::Unimplemented(_) => {
            app_error(StatusCode::NOT_IMPLEMENTED, "not_implemented", message)
        }
        RagError::Configuration(_) => {
            app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
        }
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        classify_error(&err)
    }
}

impl From<SynthesisError> for AppError {
    fn from(err: SynthesisError) -> Self {
        let mut app = classify_error(err.cause());
        if let SynthesisError::Generation { documents, .. } = &err {
            app.message = format!(
                "answer generation failed after retrieving {} documents: {}",
                documents.len(),
                app.message
            );
        }
        app
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"healthy"` while the process is serving.
    status: &'static str,
    /// Crate version from `Cargo.toml`.
    version: &'static str,
    /// Configured retrieval backend.
    backend: &'static str,
}

/// `GET /health`
///
/// Does not contact any collaborator.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.config.retrieval.backend.as_str(),
    })
}

// ============ POST /query ============

/// Query-string flags accepted by `POST /query`.
#[derive(Debug, Default, Deserialize)]
struct QueryFlags {
    #[serde(default)]
    rag: Option<bool>,
}

/// `POST /query`
///
/// Synthesis is selected by `?rag=true` or `"rag": true` in the body.
async fn handle_query(
    State(state): State<AppState>,
    flags: Result<Query<QueryFlags>, QueryRejection>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Query(flags) = flags.map_err(|e| bad_request(e.body_text()))?;
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;

    let query = req.query.trim();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if req.top_k == Some(0) {
        return Err(bad_request("top_k must be >= 1"));
    }

    let use_rag = flags.rag.unwrap_or(false) || req.rag.unwrap_or(false);

    if use_rag {
        let result = state.pipeline.answer(query, req.top_k).await.map_err(|e| {
            error!(query, error = %e, "RAG query failed");
            AppError::from(e)
        })?;
        Ok(Json(QueryResponse::new(result.documents, Some(result.answer))))
    } else {
        let documents = state.pipeline.retrieve(query, req.top_k).await.map_err(|e| {
            error!(query, error = %e, "document query failed");
            AppError::from(e)
        })?;
        Ok(Json(QueryResponse::new(documents, None)))
    }
}

// ============ /documents ============

/// Body of `POST /documents`.
#[derive(Debug, Deserialize)]
struct UploadRequest {
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

/// Paging parameters of `GET /documents`, kept as strings so that a bad
/// value yields our own 400 body rather than the extractor's rejection.
#[derive(Debug, Default, Deserialize)]
struct ListParams {
    limit: Option<String>,
    offset: Option<String>,
}

/// `POST /documents`
///
/// Validates the body, then reports the operation as not implemented (501).
async fn handle_upload_document(
    body: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;
    if req.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }
    warn!(
        chars = req.content.len(),
        metadata_keys = req.metadata.len(),
        "document upload requested"
    );
    Err(RagError::unimplemented(DocumentOperation::Upload).into())
}

/// `GET /documents?limit=&offset=`
///
/// Defaults are `limit=10`, `offset=0`. Non-numeric values are a 400.
async fn handle_list_documents(
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<StatusCode, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    let limit = parse_paging("limit", params.limit.as_deref(), 10)?;
    let offset = parse_paging("offset", params.offset.as_deref(), 0)?;
    warn!(limit, offset, "document listing requested");
    Err(RagError::unimplemented(DocumentOperation::List).into())
}

/// `DELETE /documents/{id}`
async fn handle_delete_document(Path(id): Path<String>) -> Result<StatusCode, AppError> {
    if id.trim().is_empty() {
        return Err(bad_request("document id is required"));
    }
    warn!(document_id = %id, "document deletion requested");
    Err(RagError::unimplemented(DocumentOperation::Delete).into())
}

/// Parse one paging parameter, falling back to `default` when absent.
fn parse_paging(name: &str, raw: Option<&str>, default: usize) -> Result<usize, AppError> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| bad_request(format!("invalid {} parameter", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rejection_and_unimplemented() {
        let err = RagError::RemoteRejection {
            service: "knowledge base",
            status: 403,
            code: None,
            body: "denied".into(),
        };
        let app = classify_error(&err);
        assert_eq!(app.status, StatusCode::BAD_GATEWAY);
        assert_eq!(app.code, "upstream_rejected");

        let app = classify_error(&RagError::unimplemented(DocumentOperation::List));
        assert_eq!(app.status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(app.code, "not_implemented");

        let app = classify_error(&RagError::Configuration("x".into()));
        assert_eq!(app.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_classify_serialization_as_upstream_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let app = classify_error(&RagError::from(json_err));
        assert_eq!(app.status, StatusCode::BAD_GATEWAY);
        assert_eq!(app.code, "upstream_error");
    }

    #[test]
    fn test_generation_failure_message_mentions_documents() {
        let err = SynthesisError::Generation {
            source: RagError::RemoteRejection {
                service: "chat model",
                status: 500,
                code: None,
                body: String::new(),
            },
            documents: vec![crate::models::RetrievedDocument::new("ragkb_0", "a")],
        };
        let app = AppError::from(err);
        assert_eq!(app.code, "upstream_rejected");
        assert!(app.message.contains("1 documents"));
    }

    #[test]
    fn test_parse_paging() {
        assert_eq!(parse_paging("limit", None, 10).unwrap(), 10);
        assert_eq!(parse_paging("limit", Some("25"), 10).unwrap(), 25);
        assert!(matches!(parse_paging("limit", Some(" 7 "), 10), Ok(7)));
        let err = parse_paging("offset", Some("-1"), 0).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("offset"));
        assert!(format!("{:?}", err).contains("bad_request"));
    }

    #[test]
    fn test_upload_request_metadata_optional() {
        let req: UploadRequest = serde_json::from_str(
            r#"{"content": "Refunds within 30 days.", "metadata": {"source": "faq", "page": 3}}"#,
        )
        .unwrap();
        assert_eq!(req.metadata.len(), 2);

        let req: UploadRequest = serde_json::from_str(r#"{"content": "x"}"#).unwrap();
        assert!(req.metadata.is_empty());
    }
}
