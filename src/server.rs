//! HTTP surface. Callers are authenticated upstream; the identity provider
//! forwards the subject id in `x-user-id`.

use crate::ad_creation::{AdCreationError, AdCreationOrchestrator};
use crate::ad_spec::{AdCreationRequest, AdStatus};
use crate::ads::{AdsError, AdsService};
use crate::constants::ADS_LIST_PATH;
use crate::facebook::InsightsRange;
use crate::graph::GraphError;
use crate::models::{ConnectionView, Identity, ValidationError};
use crate::oauth::{CallbackParams, OAuthError, OAuthFlow};
use crate::store::StoreError;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;

pub const USER_ID_HEADER: &str = "x-user-id";

pub struct AppState {
    pub oauth: OAuthFlow,
    pub ads: AdsService,
    pub ad_creation: AdCreationOrchestrator,
    /// Where the browser lands after the OAuth callback.
    pub app_base_url: String,
}

/// Build the axum `Router` with all connector routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/health", get(health))
        // OAuth redirect target (identity comes from `state`)
        .route("/api/auth/facebook/callback", get(facebook_callback))
        // Connection lifecycle
        .route("/api/facebook/connection", get(connection_status))
        .route("/api/facebook/connect-url", get(connect_url))
        .route("/api/facebook/disconnect", post(disconnect))
        // Account reads
        .route("/api/facebook/ad-accounts", get(ad_accounts))
        .route("/api/facebook/ad-accounts/sync", post(sync_ad_accounts))
        .route("/api/facebook/pages", get(pages))
        .route("/api/facebook/{ad_account_id}/campaigns", get(campaigns))
        .route("/api/facebook/{ad_account_id}/insights", get(insights))
        // Mutations
        .route("/api/facebook/ads", post(create_ad).get(created_ads))
        .route("/api/facebook/ads/{ad_id}/status", post(update_ad_status))
        .route("/api/facebook/action-logs", get(action_logs))
        .with_state(state)
}

// -- Errors -------------------------------------------------------------------

/// Error codes for the connector API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    CredentialExpired,
    NoActiveConnection,
    UpstreamError,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::CredentialExpired => StatusCode::UNAUTHORIZED,
            Self::NoActiveConnection => StatusCode::NOT_FOUND,
            Self::UpstreamError => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::CredentialExpired => "CREDENTIAL_EXPIRED",
            Self::NoActiveConnection => "NO_ACTIVE_CONNECTION",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.code == ErrorCode::Internal {
            tracing::error!(message = %self.message, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code.as_str().to_owned(),
                message: self.message,
            },
        };
        (self.code.http_status(), Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::new(ErrorCode::BadRequest, e.to_string())
    }
}

impl From<GraphError> for ApiError {
    fn from(e: GraphError) -> Self {
        let code = if e.is_expired_credential() {
            ErrorCode::CredentialExpired
        } else {
            ErrorCode::UpstreamError
        };
        ApiError::new(code, e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::new(ErrorCode::Internal, e.to_string())
    }
}

impl From<AdsError> for ApiError {
    fn from(e: AdsError) -> Self {
        match e {
            AdsError::NoActiveConnection => {
                ApiError::new(ErrorCode::NoActiveConnection, "No active Facebook connection")
            }
            AdsError::Graph(e) => e.into(),
            AdsError::Store(e) => e.into(),
        }
    }
}

impl From<AdCreationError> for ApiError {
    fn from(e: AdCreationError) -> Self {
        let code = match &e {
            AdCreationError::Validation(_) => ErrorCode::BadRequest,
            AdCreationError::NoActiveConnection => ErrorCode::NoActiveConnection,
            AdCreationError::Step { source, .. } if source.is_expired_credential() => {
                ErrorCode::CredentialExpired
            }
            AdCreationError::Step { .. } => ErrorCode::UpstreamError,
            AdCreationError::Store(_) => ErrorCode::Internal,
        };
        ApiError::new(code, e.to_string())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(Identity::new)
            .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "Not authenticated"))
    }
}

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ConnectionStatus {
    pub has_active_connection: bool,
    pub connection: Option<ConnectionView>,
}

#[derive(Debug, Deserialize)]
pub struct CampaignsQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightsLevelParam {
    #[default]
    Account,
    Campaign,
}

#[derive(Debug, Deserialize)]
pub struct InsightsQuery {
    #[serde(default)]
    pub level: InsightsLevelParam,
    #[serde(default)]
    pub date_preset: Option<String>,
    #[serde(default)]
    pub since: Option<NaiveDate>,
    #[serde(default)]
    pub until: Option<NaiveDate>,
}

impl InsightsQuery {
    fn range(&self) -> Result<Option<InsightsRange>, ValidationError> {
        match (self.since, self.until) {
            (Some(since), Some(until)) if since <= until => {
                Ok(Some(InsightsRange::Between { since, until }))
            }
            (Some(_), Some(_)) => Err(ValidationError::new("since must not be after until")),
            (Some(_), None) | (None, Some(_)) => Err(ValidationError::new(
                "since and until must be given together",
            )),
            (None, None) => Ok(self.date_preset.clone().map(InsightsRange::Preset)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: AdStatus,
    pub ad_account_id: String,
    #[serde(default)]
    pub ad_name: Option<String>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `GET /api/auth/facebook/callback`: validation errors answer 400, every
/// other outcome redirects back to the ads list.
async fn facebook_callback(
    State(s): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let landing = format!("{}{}", s.app_base_url, ADS_LIST_PATH);
    match s.oauth.complete(params).await {
        Ok(owner_id) => {
            tracing::info!(owner_id, "Facebook connected");
            Redirect::temporary(&format!("{}?connected=true", landing)).into_response()
        }
        Err(OAuthError::Validation(e)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Facebook OAuth callback failed");
            let query = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("error", &e.to_string())
                .finish();
            Redirect::temporary(&format!("{}?{}", landing, query)).into_response()
        }
    }
}

/// `GET /api/facebook/connection`
async fn connection_status(
    State(s): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<ConnectionStatus>, ApiError> {
    let connection = s.ads.connection(&identity).await?;
    let has_active_connection = s.ads.has_active_connection(&identity).await?;
    Ok(Json(ConnectionStatus {
        has_active_connection,
        connection,
    }))
}

/// `GET /api/facebook/connect-url`
async fn connect_url(
    State(s): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = s.oauth.authorize_url(&identity.user_id, Utc::now())?;
    Ok(Json(json!({ "url": url.as_str() })))
}

/// `POST /api/facebook/disconnect`
async fn disconnect(
    State(s): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<serde_json::Value>, ApiError> {
    s.ads.disconnect(&identity).await?;
    Ok(Json(json!({ "disconnected": true })))
}

/// `GET /api/facebook/ad-accounts`
async fn ad_accounts(
    State(s): State<Arc<AppState>>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(s.ads.ad_accounts(&identity).await?))
}

/// `POST /api/facebook/ad-accounts/sync`
async fn sync_ad_accounts(
    State(s): State<Arc<AppState>>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(s.ads.sync_ad_accounts(&identity).await?))
}

/// `GET /api/facebook/pages`
async fn pages(
    State(s): State<Arc<AppState>>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(s.ads.pages(&identity).await?))
}

/// `GET /api/facebook/{ad_account_id}/campaigns`
async fn campaigns(
    State(s): State<Arc<AppState>>,
    identity: Identity,
    Path(ad_account_id): Path<String>,
    Query(query): Query<CampaignsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        s.ads
            .campaigns(&identity, &ad_account_id, query.limit)
            .await?,
    ))
}

/// `GET /api/facebook/{ad_account_id}/insights`
async fn insights(
    State(s): State<Arc<AppState>>,
    identity: Identity,
    Path(ad_account_id): Path<String>,
    Query(query): Query<InsightsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = match query.level {
        InsightsLevelParam::Account => {
            let range = query.range()?;
            s.ads
                .account_insights(&identity, &ad_account_id, range)
                .await?
        }
        InsightsLevelParam::Campaign => {
            s.ads
                .campaign_insights(&identity, &ad_account_id, query.date_preset)
                .await?
        }
    };
    Ok(Json(rows))
}

/// `POST /api/facebook/ads`
async fn create_ad(
    State(s): State<Arc<AppState>>,
    identity: Identity,
    Json(request): Json<AdCreationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ids = s.ad_creation.create_complete_ad(&identity, request).await?;
    Ok((StatusCode::CREATED, Json(ids)))
}

/// `GET /api/facebook/ads`
async fn created_ads(
    State(s): State<Arc<AppState>>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(s.ad_creation.created_ads(&identity).await?))
}

/// `POST /api/facebook/ads/{ad_id}/status`
async fn update_ad_status(
    State(s): State<Arc<AppState>>,
    identity: Identity,
    Path(ad_id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    s.ads
        .update_ad_status(
            &identity,
            &ad_id,
            update.status,
            &update.ad_account_id,
            update.ad_name.as_deref(),
        )
        .await?;
    Ok(Json(json!({ "ad_id": ad_id, "status": update.status.as_str() })))
}

/// `GET /api/facebook/action-logs`
async fn action_logs(
    State(s): State<Arc<AppState>>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(s.ads.action_logs(&identity).await?))
}
