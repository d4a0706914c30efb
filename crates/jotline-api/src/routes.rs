use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use jotline_core::media::PresignResponse;

use crate::auth::{extract_bearer_token, AuthGuard, AuthenticatedUser, JwtVerifier};
use crate::config::ApiConfig;
use crate::error::AppError;
use crate::media::{normalize_object_key, BlobPresignService};
use crate::rate_limit::{EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot};
use crate::store::ServerStore;
use crate::{sync, user_fingerprint};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub store: ServerStore,
    pub(crate) auth: Arc<dyn AuthGuard>,
    pub(crate) presign: Option<Arc<BlobPresignService>>,
    pub(crate) rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    /// Build the state from configuration, opening the database on disk.
    pub fn from_config(config: Arc<ApiConfig>) -> Result<Self, AppError> {
        let store = ServerStore::open(&config.database_path).map_err(|error| {
            AppError::Config(format!(
                "Failed to open {}: {error}",
                config.database_path.display()
            ))
        })?;
        let auth = Arc::new(JwtVerifier::from_config(&config));
        Ok(Self::new(config, store, auth))
    }

    pub fn new(config: Arc<ApiConfig>, store: ServerStore, auth: Arc<dyn AuthGuard>) -> Self {
        Self {
            presign: BlobPresignService::from_config(&config).map(Arc::new),
            rate_limiter: Arc::new(EndpointRateLimiter::from_config(&config)),
            config,
            store,
            auth,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync/pull", get(sync::pull))
        .route("/sync/push", post(sync::push))
        .route("/media/presign/download", get(presign_download))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any)
                .max_age(Duration::from_secs(600)),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.auth.authenticate(token).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct DownloadPresignQuery {
    object_key: String,
}

async fn presign_download(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<DownloadPresignQuery>,
) -> Result<Json<PresignResponse>, AppError> {
    state
        .rate_limiter
        .check(ProtectedEndpoint::MediaPresign, &user.user_id)
        .await?;

    let object_key = normalize_object_key(&query.object_key)?;
    if !state.store.owns_blob(&user.user_id, &object_key).await? {
        tracing::warn!(
            endpoint = "media_presign_download",
            user = user_fingerprint(&user.user_id),
            "Rejected presign for an object the user does not own"
        );
        return Err(AppError::forbidden("object_key does not belong to this account"));
    }

    let signer = state.presign.as_ref().ok_or_else(|| {
        AppError::Config("Blob presign service is not configured on the backend".to_string())
    })?;
    let operation = signer.presign_download(&object_key).await?;
    tracing::info!(
        endpoint = "media_presign_download",
        user = user_fingerprint(&user.user_id),
        object_key_len = object_key.len(),
        "Issued presigned download URL"
    );
    Ok(Json(PresignResponse { operation }))
}
