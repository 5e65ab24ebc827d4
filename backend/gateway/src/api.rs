//! Axum REST API handlers.

use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::Address;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use brickfi_client::invest::{plan_investment, validate_invest_amount};
use brickfi_client::{Phase, ProjectFilter, ProjectView, Reader};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::auth::{self, AdminPolicy, AuthError, SessionInfo, SessionStore};
use crate::db;
use crate::errors::{GatewayError, Result};
use crate::upload::{self, PinnedFile, PinningService};

const RECENT_UPLOADS: i64 = 100;

pub struct ApiState {
    pub pool: SqlitePool,
    pub reader: Reader,
    /// `None` when no pinning credentials are configured.
    pub pinning: Option<Arc<dyn PinningService>>,
    pub sessions: SessionStore,
    pub admins: Arc<dyn AdminPolicy>,
    pub siwe_domain: Option<String>,
    pub max_projects: usize,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Serialize)]
pub struct ProjectsResponse {
    pub count: usize,
    pub projects: Vec<ProjectView>,
}

#[derive(Serialize)]
pub struct UploadsResponse {
    pub count: usize,
    pub uploads: Vec<db::UploadRecord>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub message: String,
    pub signature: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectQuery {
    pub search: Option<String>,
    /// Phase code (`0`..`4`) or name (`buying`, `claim_ready`, ...)
    pub phase: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvestPlanQuery {
    pub investor: Option<String>,
    pub amount: String,
}

fn parse_address(value: &str) -> Result<Address> {
    Address::from_str(value.trim())
        .map_err(|_| GatewayError::BadRequest(format!("Invalid address: {value}")))
}

fn parse_phase(value: &str) -> Result<Phase> {
    let value = value.trim();
    value
        .parse::<u8>()
        .ok()
        .and_then(Phase::from_code)
        .or_else(|| serde_json::from_value(json!(value)).ok())
        .ok_or_else(|| GatewayError::BadRequest(format!("Unknown phase: {value}")))
}

fn ok<T: Serialize>(body: T) -> axum::response::Response {
    (StatusCode::OK, Json(json!(body))).into_response()
}

impl ApiState {
    fn session_info(&self, token: &str, session: &auth::Session) -> SessionInfo {
        SessionInfo {
            token: token.to_string(),
            address: session.address,
            is_admin: self.admins.is_admin(session.address),
            expires_at: session.expires_at,
        }
    }

    async fn current_session(&self, headers: &HeaderMap) -> Result<SessionInfo> {
        let token = auth::bearer_token(headers).ok_or(AuthError::NoSession)?;
        let session = self
            .sessions
            .get(token, Utc::now())
            .await
            .ok_or(AuthError::NoSession)?;
        Ok(self.session_info(token, &session))
    }

    async fn require_admin(&self, headers: &HeaderMap) -> Result<SessionInfo> {
        let session = self.current_session(headers).await?;
        if !session.is_admin {
            return Err(GatewayError::Forbidden);
        }
        Ok(session)
    }

    async fn pin_and_record(&self, multipart: &mut Multipart) -> Result<PinnedFile> {
        let pinning = self.pinning.as_ref().ok_or(GatewayError::UploadUnavailable)?;
        let image = upload::extract_image(multipart).await?;
        let cid = pinning.pin(&image).await.map_err(|e| match e {
            GatewayError::Upload(details) => GatewayError::Upload(details),
            other => GatewayError::Upload(other.to_string()),
        })?;

        let size = image.bytes.len() as u64;
        db::insert_upload(
            &self.pool,
            &cid,
            &image.name,
            i64::try_from(size).unwrap_or(i64::MAX),
            &image.content_type,
            Utc::now().timestamp(),
        )
        .await
        .inspect_err(|e| error!("Pinned {cid} but could not record it: {e}"))?;
        info!("Pinned {} ({size} bytes) as {cid}", image.name);

        Ok(PinnedFile {
            cid,
            name: image.name,
            size,
        })
    }

    async fn projects(&self, filter: &ProjectFilter) -> Result<Vec<ProjectView>> {
        let now = Utc::now().timestamp();
        let decimals = self.reader.deployment().stablecoin_decimals;
        let mut views = Vec::new();
        for address in self.reader.list_instances(self.max_projects).await? {
            match self.reader.project(address).await? {
                Some(project) if filter.matches(&project) => {
                    views.push(ProjectView::build(&project, decimals, now))
                }
                Some(_) => {}
                None => warn!("Skipping unreadable project {address}"),
            }
        }
        Ok(views)
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /api/upload`
///
/// Multipart body with an image in the `file` field. Answers
/// `{cid, name, size}`.
pub async fn upload_image(
    State(state): State<Arc<ApiState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    match state.pin_and_record(&mut multipart).await {
        Ok(pinned) => ok(pinned),
        Err(e) => e.into_response(),
    }
}

/// `GET /api/uploads` (admin)
pub async fn list_uploads(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = state.require_admin(&headers).await {
        return e.into_response();
    }
    match db::recent_uploads(&state.pool, RECENT_UPLOADS).await {
        Ok(uploads) => ok(UploadsResponse {
            count: uploads.len(),
            uploads,
        }),
        Err(e) => e.into_response(),
    }
}

/// `GET /auth/nonce`
pub async fn auth_nonce(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match state.sessions.issue_nonce(Utc::now()).await {
        Ok(nonce) => ok(json!({ "nonce": nonce })),
        Err(e) => {
            warn!("Nonce refused: {e}");
            GatewayError::from(e).into_response()
        }
    }
}

/// `POST /auth/verify`
///
/// Verifies a signed sign-in message and opens a session.
pub async fn auth_verify(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<VerifyRequest>,
) -> impl IntoResponse {
    let now = Utc::now();
    let message = match auth::verify_message(
        &req.message,
        &req.signature,
        state.siwe_domain.as_deref(),
        now,
    ) {
        Ok(m) => m,
        Err(e) => {
            warn!("Sign-in rejected: {e}");
            return GatewayError::from(e).into_response();
        }
    };
    if !state.sessions.consume_nonce(&message.nonce, now).await {
        return GatewayError::from(AuthError::InvalidNonce).into_response();
    }

    let (token, session) = state.sessions.open(auth::signer_address(&message), now).await;
    ok(state.session_info(&token, &session))
}

/// `GET /auth/session`
pub async fn auth_session(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    match state.current_session(&headers).await {
        Ok(session) => ok(session),
        Err(e) => e.into_response(),
    }
}

/// `POST /auth/logout`
pub async fn auth_logout(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let revoked = match auth::bearer_token(&headers) {
        Some(token) => state.sessions.revoke(token).await,
        None => false,
    };
    if revoked {
        StatusCode::NO_CONTENT.into_response()
    } else {
        GatewayError::from(AuthError::NoSession).into_response()
    }
}

/// `GET /projects?search=&phase=`
pub async fn list_projects(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ProjectQuery>,
) -> impl IntoResponse {
    let phase = match query.phase.as_deref().map(parse_phase).transpose() {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    let filter = ProjectFilter {
        search: query.search,
        phase,
    };
    match state.projects(&filter).await {
        Ok(projects) => ok(ProjectsResponse {
            count: projects.len(),
            projects,
        }),
        Err(e) => e.into_response(),
    }
}

/// `GET /projects/:address`
pub async fn get_project(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let address = match parse_address(&address) {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };
    match state.reader.project(address).await {
        Ok(Some(project)) => ok(ProjectView::build(
            &project,
            state.reader.deployment().stablecoin_decimals,
            Utc::now().timestamp(),
        )),
        Ok(None) => GatewayError::NotFound(format!("Project {address} not found")).into_response(),
        Err(e) => GatewayError::from(e).into_response(),
    }
}

/// `GET /projects/:address/positions/:holder`
pub async fn get_position(
    State(state): State<Arc<ApiState>>,
    Path((address, holder)): Path<(String, String)>,
) -> impl IntoResponse {
    let (address, holder) = match (parse_address(&address), parse_address(&holder)) {
        (Ok(a), Ok(h)) => (a, h),
        (Err(e), _) | (_, Err(e)) => return e.into_response(),
    };
    match state.reader.position(address, holder).await {
        Ok(Some(position)) => ok(position),
        Ok(None) => GatewayError::NotFound(format!("Project {address} not found")).into_response(),
        Err(e) => GatewayError::from(e).into_response(),
    }
}

/// `GET /projects/:address/invest-plan?investor=&amount=`
///
/// The amount is validated before any chain read.
pub async fn invest_plan(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Query(query): Query<InvestPlanQuery>,
) -> impl IntoResponse {
    let pool = match parse_address(&address) {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };
    let decimals = state.reader.deployment().stablecoin_decimals;
    let amount = match validate_invest_amount(&query.amount, decimals) {
        Ok(a) => a,
        Err(e) => return GatewayError::BadRequest(e.to_string()).into_response(),
    };
    let investor = match query.investor.as_deref().map(parse_address).transpose() {
        Ok(i) => i,
        Err(e) => return e.into_response(),
    };

    let allowance = match investor {
        Some(owner) => match state.reader.allowance(owner, pool).await {
            Ok(a) => Some(a),
            Err(e) => return GatewayError::from(e).into_response(),
        },
        None => None,
    };
    ok(plan_investment(amount, allowance, investor))
}
