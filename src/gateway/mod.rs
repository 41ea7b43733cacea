//! JSON-over-HTTP adapter for the authentication core.
//!
//! Handlers decode the request, build a [`RequestContext`] with the configured
//! deadline, call [`AuthService`] and map [`AuthError`] kinds to status codes.
//! No business rules live here.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;

use crate::auth::{AuthError, AuthService, ErrorKind, RequestContext, UserInfo};

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 16 * 1024;

#[derive(Clone)]
pub struct GatewayState {
    pub auth: Arc<AuthService>,
    pub request_timeout: Duration,
}

impl GatewayState {
    pub fn new(auth: Arc<AuthService>, request_timeout: Duration) -> Self {
        Self {
            auth,
            request_timeout,
        }
    }

    fn request_context(&self) -> RequestContext {
        RequestContext::with_timeout(self.request_timeout)
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub app_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IsAdminResponse {
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IsAuthenticatedResponse {
    pub is_authenticated: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub revoked: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub retryable: bool,
}

// ── Error mapping ───────────────────────────────────────────────────

/// Status code for each caller-facing error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidCredentials => StatusCode::FORBIDDEN,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::UserExists => StatusCode::CONFLICT,
        ErrorKind::UserNotFound | ErrorKind::AppNotFound => StatusCode::NOT_FOUND,
        ErrorKind::TokenMalformed
        | ErrorKind::TokenBadSignature
        | ErrorKind::TokenExpiredClaim
        | ErrorKind::TokenNotLive => StatusCode::UNAUTHORIZED,
        ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub struct ApiError(AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

/// Unparseable, mistyped or missing bodies are caller input errors.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(AuthError::InvalidInput(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);

        let message = match kind {
            ErrorKind::StoreUnavailable => {
                tracing::error!(error = ?self.0, "storage failure");
                "service temporarily unavailable".to_string()
            }
            ErrorKind::Internal => {
                tracing::error!(error = ?self.0, "internal failure");
                "internal error".to_string()
            }
            _ => self.0.to_string(),
        };

        let body = ErrorBody {
            error: kind.as_str().to_string(),
            message,
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

// ── Handlers ────────────────────────────────────────────────────────

async fn handle_health() -> &'static str {
    "ok"
}

/// POST /v1/login
async fn handle_login(
    State(state): State<GatewayState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(req) = body?;
    let ctx = state.request_context();
    let token = state
        .auth
        .login(&ctx, &req.email, &req.password, req.app_id)
        .await?;
    Ok(Json(LoginResponse { token }))
}

/// POST /v1/register
async fn handle_register(
    State(state): State<GatewayState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let Json(req) = body?;
    let ctx = state.request_context();
    let user_id = state.auth.register(&ctx, &req.email, &req.password).await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })))
}

/// GET /v1/users/{id}/admin
async fn handle_is_admin(
    State(state): State<GatewayState>,
    Path(user_id): Path<i64>,
) -> Result<Json<IsAdminResponse>, ApiError> {
    let ctx = state.request_context();
    let is_admin = state.auth.is_admin(&ctx, user_id).await?;
    Ok(Json(IsAdminResponse { is_admin }))
}

/// POST /v1/authenticated
async fn handle_is_authenticated(
    State(state): State<GatewayState>,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<IsAuthenticatedResponse>, ApiError> {
    let Json(req) = body?;
    let ctx = state.request_context();
    let is_authenticated = state.auth.is_authenticated(&ctx, &req.token).await?;
    Ok(Json(IsAuthenticatedResponse { is_authenticated }))
}

/// POST /v1/userinfo
async fn handle_user_info(
    State(state): State<GatewayState>,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<UserInfo>, ApiError> {
    let Json(req) = body?;
    let ctx = state.request_context();
    let info = state.auth.user_info(&ctx, &req.token).await?;
    Ok(Json(info))
}

/// POST /v1/logout
async fn handle_logout(
    State(state): State<GatewayState>,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let Json(req) = body?;
    let ctx = state.request_context();
    let revoked = state.auth.logout(&ctx, &req.token).await?;
    Ok(Json(LogoutResponse { revoked }))
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/v1/login", post(handle_login))
        .route("/v1/register", post(handle_register))
        .route("/v1/users/{id}/admin", get(handle_is_admin))
        .route("/v1/authenticated", post(handle_is_authenticated))
        .route("/v1/userinfo", post(handle_user_info))
        .route("/v1/logout", post(handle_logout))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Serve on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: GatewayState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_are_permission_denied() {
        assert_eq!(status_for(ErrorKind::InvalidCredentials), StatusCode::FORBIDDEN);
    }

    #[test]
    fn lookups_are_not_found() {
        assert_eq!(status_for(ErrorKind::UserNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::AppNotFound), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_body_uses_error_envelope() {
        use axum::body::Body;
        use axum::http::Request;
        use http_body_util::BodyExt;
        use tower::ServiceExt;

        let store = Arc::new(crate::store::MemoryStore::new());
        let auth = AuthService::from_store(store, chrono::Duration::hours(1));
        let app = router(GatewayState::new(Arc::new(auth), Duration::from_secs(5)));

        let response = app
            .oneshot(
                Request::post("/v1/login")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"email\": 42"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "invalid_input");
        assert!(!body.retryable);
    }

    #[test]
    fn internal_failures_hide_detail() {
        let err = AuthError::internal("token.issue", anyhow::anyhow!("secret key bytes: 0xdeadbeef"));
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
