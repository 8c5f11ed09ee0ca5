//! REST API server for TouristID
//!
//! Registration, credential re-issue, guarded read-back of stored documents
//! and read-only views of the ledger.

use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::{self, header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::blockchain::Block;
use crate::config::AuthConfig;
use crate::credential::{CredentialEncoder, CredentialImage};
use crate::error::RegistryError;
use crate::pipeline::RegistrationPipeline;
use crate::registration::RegisterRequest;

const AUTH_REALM: &str = "Basic realm=\"Restricted\"";
const TOURIST_ID_HEADER: &str = "x-tourist-id";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RegistrationPipeline>,
    pub encoder: Arc<dyn CredentialEncoder>,
    pub auth: Arc<AuthConfig>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<RegistrationPipeline>,
        encoder: Arc<dyn CredentialEncoder>,
        auth: AuthConfig,
    ) -> Self {
        AppState {
            pipeline,
            encoder,
            auth: Arc::new(auth),
        }
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub struct ApiError(RegistryError);

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            RegistryError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            RegistryError::NotFound(_) => (StatusCode::NOT_FOUND, "Tourist data not found".to_string()),
            RegistryError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            RegistryError::Auth(_) => return unauthorized(),
            RegistryError::Storage(_) | RegistryError::Ledger(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to access tourist data".to_string(),
            ),
            RegistryError::Encoding(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate QR".to_string(),
            ),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, AUTH_REALM)],
        Json(ErrorResponse {
            error: "Unauthorized".to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Serialize)]
struct ChainResponse {
    blockchain: Vec<Block>,
    length: usize,
}

#[derive(Serialize)]
struct VerifyResponse {
    valid: bool,
    length: usize,
    first_invalid_index: Option<usize>,
    reason: Option<String>,
}

// ============================================================================
// Middleware
// ============================================================================

/// Logs method, path, status and duration of every request.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

/// HTTP basic auth against the configured admin credentials. With no
/// credentials configured every request is rejected.
async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match check_basic_auth(req.headers(), &state.auth) {
        Ok(()) => next.run(req).await,
        Err(reason) => {
            tracing::warn!(path = %req.uri().path(), reason, "api.auth_rejected");
            unauthorized()
        }
    }
}

fn check_basic_auth(headers: &HeaderMap, auth: &AuthConfig) -> Result<(), &'static str> {
    if !auth.is_configured() {
        return Err("admin credentials not configured");
    }

    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or("missing authorization header")?;
    let (scheme, encoded) = value
        .trim_start()
        .split_once(' ')
        .ok_or("unsupported authorization scheme")?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err("unsupported authorization scheme");
    }
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| "malformed credentials")?;
    let decoded = String::from_utf8(decoded).map_err(|_| "malformed credentials")?;
    let (user, pass) = decoded.split_once(':').ok_or("malformed credentials")?;

    let user_ok = constant_time_eq(user.as_bytes(), auth.admin_user.as_bytes());
    let pass_ok = constant_time_eq(pass.as_bytes(), auth.admin_pass.as_bytes());
    if user_ok & pass_ok {
        Ok(())
    } else {
        Err("invalid credentials")
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ============================================================================
// API Server
// ============================================================================

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Build the API router with all endpoints
pub fn build_api_router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/tourist/data/:id", get(get_tourist_data))
        .route("/tourist/qr/:id", get(get_tourist_qr))
        .route("/blockchain/audit/:index", get(audit_block))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let api_routes = Router::new()
        .route("/tourist/register", post(register_tourist))
        .route("/blockchain", get(get_blockchain))
        .route("/blockchain/verify", get(verify_blockchain))
        .merge(guarded);

    Router::new()
        .route("/ping", get(ping))
        .nest("/api", api_routes)
        .layer(middleware::from_fn(logging_middleware))
        .layer(cors_layer())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn run_api_server(state: AppState, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_api_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn ping() -> impl IntoResponse {
    Json(MessageResponse { message: "OK" })
}

async fn register_tourist(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: RegisterRequest = serde_json::from_slice(&body)
        .map_err(|e| RegistryError::Validation(format!("Invalid request body: {}", e)))?;

    let (registration, image) = state
        .pipeline
        .register_rendered(request, state.encoder.as_ref())
        .await?;

    credential_response(&registration.id, image)
}

async fn get_tourist_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let raw = state.pipeline.fetch(&id).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], raw).into_response())
}

async fn get_tourist_qr(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let payload = state.pipeline.credential_for(&id).await?;
    let image = state.encoder.encode(&payload)?;
    credential_response(&id, image)
}

async fn get_blockchain(State(state): State<AppState>) -> impl IntoResponse {
    let blocks = state.pipeline.ledger().snapshot();
    Json(ChainResponse {
        length: blocks.len(),
        blockchain: blocks,
    })
}

async fn verify_blockchain(State(state): State<AppState>) -> impl IntoResponse {
    let ledger = state.pipeline.ledger();
    let length = ledger.len();
    let response = match ledger.verify() {
        Ok(()) => VerifyResponse {
            valid: true,
            length,
            first_invalid_index: None,
            reason: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "ledger verification failed");
            VerifyResponse {
                valid: false,
                length,
                first_invalid_index: e.index(),
                reason: Some(e.to_string()),
            }
        }
    };
    Json(response)
}

async fn audit_block(
    State(state): State<AppState>,
    Path(index): Path<u64>,
) -> Result<Response, ApiError> {
    let report = state.pipeline.audit(index).await?;
    Ok(Json(report).into_response())
}

fn credential_response(id: &str, image: CredentialImage) -> Result<Response, ApiError> {
    let disposition = format!("inline; filename=\"tourist_{}.{}\"", id, image.extension);
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| RegistryError::Encoding(format!("invalid header value: {}", e)))?;
    let tourist_id = HeaderValue::from_str(id)
        .map_err(|e| RegistryError::Encoding(format!("invalid header value: {}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(image.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
            (header::HeaderName::from_static(TOURIST_ID_HEADER), tourist_id),
        ],
        image.bytes,
    )
        .into_response())
}
