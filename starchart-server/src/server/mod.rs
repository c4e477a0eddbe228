mod acl;
pub mod auth;
mod config;
mod dto;

use crate::server::auth::SessionCtx;
use crate::storage::models::{Household, ProfileChanges};
use crate::storage::{Store, StorageError};
use axum::body::Bytes;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{Method, StatusCode, header},
    routing::{get, post, put},
};
use bcrypt::verify;
use chrono::Utc;
pub use config::{AppConfig, ConfigError, UserConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use starchart_shared::api;
use starchart_shared::auth::ProfileKind;
use starchart_shared::domain::{GoalStatus, PurchaseStatus};
use starchart_shared::policy::{LimitExceeded, Limits};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

/// bcrypt cost for profile PINs.
const PIN_HASH_COST: u32 = 10;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        Self {
            config,
            store,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Loads the household and the limits of its current effective tier.
    async fn household_limits(&self, household_id: &str) -> Result<(Household, Limits), AppError> {
        let household = self
            .store
            .get_household(household_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("household not found: {household_id}")))?;
        let limits = household.effective_tier(Utc::now().naive_utc()).limits();
        Ok((household, limits))
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let household = Router::new()
        .route("/api/v1/households/{hid}/session", get(api_session))
        .route("/api/v1/households/{hid}/household", get(api_household))
        .route("/api/v1/households/{hid}/invite", get(api_invite))
        .route("/api/v1/households/{hid}/analytics", get(api_analytics))
        .route(
            "/api/v1/households/{hid}/profiles",
            get(api_list_profiles).post(api_create_profile),
        )
        .route(
            "/api/v1/households/{hid}/profiles/{pid}",
            put(api_update_profile).delete(api_delete_profile),
        )
        .route(
            "/api/v1/households/{hid}/profiles/{pid}/switch",
            post(api_switch_profile),
        )
        .route(
            "/api/v1/households/{hid}/profiles/{pid}/activity-logs",
            get(api_list_activity_logs),
        )
        .route(
            "/api/v1/households/{hid}/profiles/{pid}/activities/{aid}/complete",
            post(api_complete_activity),
        )
        .route(
            "/api/v1/households/{hid}/profiles/{pid}/purchases",
            get(api_list_purchases).post(api_purchase_reward),
        )
        .route(
            "/api/v1/households/{hid}/profiles/{pid}/purchases/{id}/claim",
            post(api_claim_purchase),
        )
        .route(
            "/api/v1/households/{hid}/profiles/{pid}/inbox",
            get(api_list_inbox).post(api_grant_stars),
        )
        .route(
            "/api/v1/households/{hid}/profiles/{pid}/inbox/{id}/claim",
            post(api_claim_inbox_item),
        )
        .route(
            "/api/v1/households/{hid}/profiles/{pid}/goals",
            get(api_list_goals).post(api_create_goal),
        )
        .route(
            "/api/v1/households/{hid}/activities",
            get(api_list_activities).post(api_create_activity),
        )
        .route(
            "/api/v1/households/{hid}/activities/{aid}",
            axum::routing::delete(api_delete_activity),
        )
        .route(
            "/api/v1/households/{hid}/activities/{aid}/assignees",
            put(api_set_activity_assignees),
        )
        .route(
            "/api/v1/households/{hid}/rewards",
            get(api_list_rewards).post(api_create_reward),
        )
        .route(
            "/api/v1/households/{hid}/rewards/{rid}",
            axum::routing::delete(api_delete_reward),
        )
        .route(
            "/api/v1/households/{hid}/rewards/{rid}/assignees",
            put(api_set_reward_assignees),
        )
        .route(
            "/api/v1/households/{hid}/purchases/{id}/{action}",
            post(api_purchase_action),
        )
        .route(
            "/api/v1/households/{hid}/goals/{gid}/{action}",
            post(api_goal_action),
        )
        .with_state(state.clone())
        .layer(middleware::from_fn(acl::enforce_acl))
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Authenticated, but not bound to the token's household
    let account = Router::new()
        .route("/api/v1/auth/logout", post(api_auth_logout))
        .route("/api/v1/households/{hid}/join", post(api_join_household))
        .with_state(state.clone())
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            username = tracing::field::Empty,
            household_id = tracing::field::Empty,
            profile_id = tracing::field::Empty,
            kind = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/version", get(api_version))
        .route("/api/v1/version", get(api_version))
        .route("/api/v1/auth/login", post(api_auth_login))
        .merge(account)
        .merge(household)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn api_version() -> Json<api::VersionDto> {
    Json(api::VersionDto {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-origin"),
    );

    // Balances and logs change constantly; never cache API answers
    if path == "/healthz" || path.starts_with("/api/") {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(session) = req.extensions().get::<SessionCtx>() {
        let span = Span::current();
        span.record("username", tracing::field::display(session.username()));
        span.record(
            "household_id",
            tracing::field::display(session.household_id()),
        );
        if let Some(pid) = session.active_profile_id() {
            span.record("profile_id", tracing::field::display(pid));
        }
        if let Some(kind) = session.active_kind {
            span.record("kind", tracing::field::display(kind));
        }
    }
    Ok(next.run(req).await)
}

// Path shapes

#[derive(Deserialize)]
struct HouseholdPath {
    hid: String,
}

#[derive(Deserialize)]
struct ProfilePath {
    hid: String,
    pid: String,
}

#[derive(Deserialize)]
struct ProfileItemPath {
    hid: String,
    pid: String,
    id: i32,
}

#[derive(Deserialize)]
struct ProfileActivityPath {
    hid: String,
    pid: String,
    aid: String,
}

#[derive(Deserialize)]
struct ActivityPath {
    hid: String,
    aid: String,
}

#[derive(Deserialize)]
struct RewardPath {
    hid: String,
    rid: String,
}

#[derive(Deserialize)]
struct PurchaseActionPath {
    hid: String,
    id: i32,
    action: String,
}

#[derive(Deserialize)]
struct GoalActionPath {
    hid: String,
    gid: String,
    action: String,
}

#[derive(Deserialize)]
struct PageOpts {
    page: Option<usize>,
    per_page: Option<usize>,
}

#[derive(Deserialize)]
struct InboxOpts {
    #[serde(default)]
    all: bool,
}

// Auth

async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let user = state.config.find_user(&body.username).ok_or_else(|| {
        tracing::warn!(username=%body.username, "login: unknown username");
        AppError::unauthorized()
    })?;
    if !verify(&body.password, &user.password_hash).map_err(|e| {
        tracing::error!(username=%body.username, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        tracing::warn!(username=%body.username, "login: invalid password");
        return Err(AppError::unauthorized());
    }

    let memberships = state.store.memberships(&user.username).await?;
    let household_id = match body.household_id {
        Some(requested) if memberships.contains(&requested) => requested,
        Some(requested) => {
            tracing::warn!(username=%user.username, household_id=%requested, "login: not a member");
            return Err(AppError::forbidden());
        }
        None => match memberships.into_iter().next() {
            Some(first) => first,
            None => state.store.create_household_for(&user.username).await?.id,
        },
    };

    let token = auth::issue_jwt_for_user(&state, &user.username, &household_id).await?;
    Ok(Json(api::AuthResp {
        token,
        household_id,
    }))
}

async fn api_auth_logout(
    State(state): State<AppState>,
    Extension(session): Extension<SessionCtx>,
) -> Result<StatusCode, AppError> {
    state.store.delete_session(session.jti()).await?;
    tracing::info!(username=%session.username(), "logout");
    Ok(StatusCode::NO_CONTENT)
}

async fn api_join_household(
    State(state): State<AppState>,
    Extension(session): Extension<SessionCtx>,
    Path(p): Path<HouseholdPath>,
) -> Result<Json<api::AuthResp>, AppError> {
    let joined = state.store.join_household(&p.hid, session.username()).await?;
    if joined {
        tracing::info!(username=%session.username(), household_id=%p.hid, "joined household");
    }
    let token = auth::issue_jwt_for_user(&state, session.username(), &p.hid).await?;
    Ok(Json(api::AuthResp {
        token,
        household_id: p.hid,
    }))
}

// Session & household

async fn api_session(
    Extension(session): Extension<SessionCtx>,
) -> Result<Json<api::SessionDto>, AppError> {
    Ok(Json(api::SessionDto {
        username: session.username().to_string(),
        household_id: session.household_id().to_string(),
        active_profile: session.active_profile.map(dto::profile).transpose()?,
    }))
}

async fn api_household(
    State(state): State<AppState>,
    Path(p): Path<HouseholdPath>,
) -> Result<Json<api::HouseholdDto>, AppError> {
    let (household, limits) = state.household_limits(&p.hid).await?;
    let members = state.store.household_members(&p.hid).await?;
    let usage = state.store.household_usage(&p.hid).await?;
    Ok(Json(api::HouseholdDto {
        license: household.license_tier(),
        license_expires_at: household.license_expires_at.map(dto::rfc3339),
        effective_tier: household.effective_tier(Utc::now().naive_utc()),
        id: household.id,
        limits,
        members,
        usage: api::UsageDto {
            children: usage.children,
            routines: usage.routines,
            open_goals: usage.open_goals,
        },
    }))
}

async fn api_invite(
    State(state): State<AppState>,
    Path(p): Path<HouseholdPath>,
) -> Result<Json<api::InviteDto>, AppError> {
    Ok(Json(api::InviteDto {
        url: state.config.invite_url(&p.hid),
        household_id: p.hid,
    }))
}

async fn api_analytics(
    State(state): State<AppState>,
    Path(p): Path<HouseholdPath>,
) -> Result<Json<api::AnalyticsDto>, AppError> {
    let (_, limits) = state.household_limits(&p.hid).await?;
    limits.check_analytics()?;
    let rows = state.store.child_summaries(&p.hid).await?;
    Ok(Json(api::AnalyticsDto {
        children: rows.into_iter().map(dto::child_summary).collect(),
    }))
}

// Profiles

async fn api_list_profiles(
    State(state): State<AppState>,
    Path(p): Path<HouseholdPath>,
) -> Result<Json<Vec<api::ProfileDto>>, AppError> {
    let rows = state.store.list_profiles(&p.hid).await?;
    Ok(Json(dto::all(rows, dto::profile)?))
}

async fn api_create_profile(
    State(state): State<AppState>,
    Path(p): Path<HouseholdPath>,
    Json(body): Json<api::CreateProfileReq>,
) -> Result<Json<api::ProfileDto>, AppError> {
    let (_, limits) = state.household_limits(&p.hid).await?;
    if body.kind == ProfileKind::Child {
        let children = state.store.count_child_profiles(&p.hid).await?;
        limits.check_children(children)?;
    }
    let avatar = match body.avatar.as_deref() {
        Some(a) => {
            limits.check_avatar(a)?;
            a
        }
        None => limits.default_avatar(),
    };
    let theme = match body.theme.as_deref() {
        Some(t) => {
            limits.check_theme(t)?;
            t
        }
        None => limits.default_theme(),
    };
    let pin_hash = body.pin.as_deref().map(hash_pin).transpose()?;

    let profile = state
        .store
        .create_profile(&p.hid, body.kind, &body.display_name, avatar, theme, pin_hash)
        .await?;
    Ok(Json(dto::profile(profile)?))
}

async fn api_update_profile(
    State(state): State<AppState>,
    Path(p): Path<ProfilePath>,
    Json(body): Json<api::UpdateProfileReq>,
) -> Result<Json<api::ProfileDto>, AppError> {
    let (_, limits) = state.household_limits(&p.hid).await?;
    if let Some(a) = body.avatar.as_deref() {
        limits.check_avatar(a)?;
    }
    if let Some(t) = body.theme.as_deref() {
        limits.check_theme(t)?;
    }
    if let Some(name) = body.display_name.as_deref()
        && name.trim().is_empty()
    {
        return Err(AppError::bad_request("display_name cannot be empty"));
    }
    let pin_hash = match body.pin.as_deref() {
        None => None,
        Some("") => Some(None),
        Some(pin) => Some(Some(hash_pin(pin)?)),
    };
    let changes = ProfileChanges {
        display_name: body.display_name.map(|n| n.trim().to_string()),
        avatar: body.avatar,
        theme: body.theme,
        pin_hash,
    };
    let profile = state.store.update_profile(&p.hid, &p.pid, changes).await?;
    Ok(Json(dto::profile(profile)?))
}

async fn api_delete_profile(
    State(state): State<AppState>,
    Path(p): Path<ProfilePath>,
) -> Result<Json<api::CascadeReportDto>, AppError> {
    let profiles = state.store.list_profiles(&p.hid).await?;
    let target = profiles
        .iter()
        .find(|x| x.id == p.pid)
        .ok_or_else(|| AppError::not_found(format!("profile not found: {}", p.pid)))?;
    let parents = profiles
        .iter()
        .filter(|x| x.kind == ProfileKind::Parent.as_str())
        .count();
    if target.kind == ProfileKind::Parent.as_str() && parents <= 1 {
        return Err(AppError::conflict("the last parent profile cannot be deleted"));
    }

    let report = state.store.delete_profile_cascade(&p.hid, &p.pid).await?;
    Ok(Json(api::CascadeReportDto {
        profile_id: p.pid,
        purchase_logs: report.purchase_logs,
        activity_logs: report.activity_logs,
        goals: report.goals,
        inbox_items: report.inbox_items,
        sessions_cleared: report.sessions_cleared,
        activities_unassigned: report.activities_unassigned,
        rewards_unassigned: report.rewards_unassigned,
    }))
}

async fn api_switch_profile(
    State(state): State<AppState>,
    Extension(session): Extension<SessionCtx>,
    Path(p): Path<ProfilePath>,
    body: Bytes,
) -> Result<Json<api::SessionDto>, AppError> {
    let body: api::SwitchProfileReq = json_or_default(&body)?;
    let profile = state
        .store
        .get_profile(&p.hid, &p.pid)
        .await?
        .ok_or_else(|| AppError::not_found(format!("profile not found: {}", p.pid)))?;
    if let Some(hash) = profile.pin_hash.as_deref() {
        let pin = body.pin.as_deref().unwrap_or_default();
        if !verify(pin, hash).map_err(AppError::internal)? {
            tracing::warn!(username=%session.username(), profile_id=%p.pid, "switch: wrong PIN");
            return Err(AppError::forbidden());
        }
    }
    state
        .store
        .set_active_profile(session.jti(), Some(&profile.id))
        .await?;
    Ok(Json(api::SessionDto {
        username: session.username().to_string(),
        household_id: session.household_id().to_string(),
        active_profile: Some(dto::profile(profile)?),
    }))
}

// Activities

async fn api_list_activities(
    State(state): State<AppState>,
    Extension(session): Extension<SessionCtx>,
    Path(p): Path<HouseholdPath>,
) -> Result<Json<Vec<api::ActivityDto>>, AppError> {
    // Children only see what is assigned to them
    let filter = if session.is_parent() {
        None
    } else {
        session.active_profile_id()
    };
    let rows = state.store.list_activities(&p.hid, filter).await?;
    let items = rows
        .into_iter()
        .map(|(a, ids)| dto::activity(a, ids))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}

async fn api_create_activity(
    State(state): State<AppState>,
    Path(p): Path<HouseholdPath>,
    Json(body): Json<api::CreateActivityReq>,
) -> Result<Json<api::ActivityDto>, AppError> {
    let (_, limits) = state.household_limits(&p.hid).await?;
    let existing = state.store.count_activities(&p.hid).await?;
    limits.check_routines(existing)?;

    let steps = serde_json::to_string(&body.steps).map_err(AppError::internal)?;
    let schedule = serde_json::to_string(&body.schedule).map_err(AppError::internal)?;
    let (activity, ids) = state
        .store
        .create_activity(
            &p.hid,
            &body.name,
            &steps,
            &schedule,
            body.stars,
            &body.profile_ids,
        )
        .await?;
    Ok(Json(dto::activity(activity, ids)?))
}

async fn api_delete_activity(
    State(state): State<AppState>,
    Path(p): Path<ActivityPath>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_activity(&p.hid, &p.aid).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("activity not found: {}", p.aid)))
    }
}

async fn api_set_activity_assignees(
    State(state): State<AppState>,
    Path(p): Path<ActivityPath>,
    Json(body): Json<api::AssigneesReq>,
) -> Result<Json<api::AssigneesReq>, AppError> {
    let profile_ids = state
        .store
        .set_activity_assignees(&p.hid, &p.aid, &body.profile_ids)
        .await?;
    Ok(Json(api::AssigneesReq { profile_ids }))
}

async fn api_complete_activity(
    State(state): State<AppState>,
    Path(p): Path<ProfileActivityPath>,
    body: Bytes,
) -> Result<Json<api::CompletionResp>, AppError> {
    let body: api::CompleteActivityReq = json_or_default(&body)?;
    let (log, profile) = state
        .store
        .complete_activity(&p.hid, &p.pid, &p.aid, body.steps_completed)
        .await?;
    Ok(Json(api::CompletionResp {
        balance: dto::balance(&profile),
        log: dto::activity_log(log)?,
    }))
}

async fn api_list_activity_logs(
    State(state): State<AppState>,
    Path(p): Path<ProfilePath>,
    Query(opts): Query<PageOpts>,
) -> Result<Json<Vec<api::ActivityLogDto>>, AppError> {
    let page = opts.page.unwrap_or(1);
    let per_page = opts.per_page.unwrap_or(20);
    let rows = state
        .store
        .list_activity_logs(&p.hid, &p.pid, page, per_page)
        .await?;
    Ok(Json(dto::all(rows, dto::activity_log)?))
}

// Rewards

async fn api_list_rewards(
    State(state): State<AppState>,
    Extension(session): Extension<SessionCtx>,
    Path(p): Path<HouseholdPath>,
) -> Result<Json<Vec<api::RewardDto>>, AppError> {
    let filter = if session.is_parent() {
        None
    } else {
        session.active_profile_id()
    };
    let rows = state.store.list_rewards(&p.hid, filter).await?;
    Ok(Json(
        rows.into_iter()
            .map(|(r, ids)| dto::reward(r, ids))
            .collect(),
    ))
}

async fn api_create_reward(
    State(state): State<AppState>,
    Path(p): Path<HouseholdPath>,
    Json(body): Json<api::CreateRewardReq>,
) -> Result<Json<api::RewardDto>, AppError> {
    let (_, limits) = state.household_limits(&p.hid).await?;
    limits.check_reward_customization()?;
    let (reward, ids) = state
        .store
        .create_reward(&p.hid, &body.name, body.cost, &body.assigned_profile_ids)
        .await?;
    Ok(Json(dto::reward(reward, ids)))
}

async fn api_delete_reward(
    State(state): State<AppState>,
    Path(p): Path<RewardPath>,
) -> Result<StatusCode, AppError> {
    let (_, limits) = state.household_limits(&p.hid).await?;
    limits.check_reward_customization()?;
    if state.store.delete_reward(&p.hid, &p.rid).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("reward not found: {}", p.rid)))
    }
}

async fn api_set_reward_assignees(
    State(state): State<AppState>,
    Path(p): Path<RewardPath>,
    Json(body): Json<api::AssigneesReq>,
) -> Result<Json<api::AssigneesReq>, AppError> {
    let (_, limits) = state.household_limits(&p.hid).await?;
    limits.check_reward_customization()?;
    let profile_ids = state
        .store
        .set_reward_assignees(&p.hid, &p.rid, &body.profile_ids)
        .await?;
    Ok(Json(api::AssigneesReq { profile_ids }))
}

// Purchases

async fn api_list_purchases(
    State(state): State<AppState>,
    Path(p): Path<ProfilePath>,
) -> Result<Json<Vec<api::PurchaseDto>>, AppError> {
    let rows = state.store.list_purchases(&p.hid, &p.pid).await?;
    Ok(Json(dto::all(rows, dto::purchase)?))
}

async fn api_purchase_reward(
    State(state): State<AppState>,
    Path(p): Path<ProfilePath>,
    Json(body): Json<api::PurchaseReq>,
) -> Result<Json<api::PurchaseDto>, AppError> {
    let row = state
        .store
        .purchase_reward(&p.hid, &p.pid, &body.reward_id)
        .await?;
    tracing::info!(profile_id=%p.pid, reward=%row.reward_name, cost=row.reward_cost, "reward purchased");
    Ok(Json(dto::purchase(row)?))
}

async fn api_claim_purchase(
    State(state): State<AppState>,
    Path(p): Path<ProfileItemPath>,
) -> Result<Json<api::PurchaseDto>, AppError> {
    let row = state
        .store
        .transition_purchase(&p.hid, p.id, PurchaseStatus::Claimed, Some(&p.pid))
        .await?;
    Ok(Json(dto::purchase(row)?))
}

async fn api_purchase_action(
    State(state): State<AppState>,
    Path(p): Path<PurchaseActionPath>,
) -> Result<Json<api::PurchaseDto>, AppError> {
    let next = match p.action.as_str() {
        "approve" => PurchaseStatus::Approved,
        "reject" => PurchaseStatus::Rejected,
        other => return Err(AppError::bad_request(format!("unknown action: {other}"))),
    };
    let row = state
        .store
        .transition_purchase(&p.hid, p.id, next, None)
        .await?;
    Ok(Json(dto::purchase(row)?))
}

// Inbox

async fn api_grant_stars(
    State(state): State<AppState>,
    Extension(session): Extension<SessionCtx>,
    Path(p): Path<ProfilePath>,
    Json(body): Json<api::GrantReq>,
) -> Result<Json<api::InboxItemDto>, AppError> {
    let granted_by = session
        .active_profile
        .as_ref()
        .map(|x| x.display_name.as_str())
        .unwrap_or(session.username());
    let item = state
        .store
        .grant_stars(&p.hid, &p.pid, body.stars, &body.reason, granted_by)
        .await?;
    Ok(Json(dto::inbox_item(item)))
}

async fn api_list_inbox(
    State(state): State<AppState>,
    Path(p): Path<ProfilePath>,
    Query(opts): Query<InboxOpts>,
) -> Result<Json<Vec<api::InboxItemDto>>, AppError> {
    let rows = state.store.list_inbox(&p.hid, &p.pid, opts.all).await?;
    Ok(Json(rows.into_iter().map(dto::inbox_item).collect()))
}

async fn api_claim_inbox_item(
    State(state): State<AppState>,
    Path(p): Path<ProfileItemPath>,
) -> Result<Json<api::BalanceDto>, AppError> {
    let (_, profile) = state
        .store
        .claim_inbox_item(&p.hid, &p.pid, p.id)
        .await?;
    Ok(Json(dto::balance(&profile)))
}

// Goals

async fn api_list_goals(
    State(state): State<AppState>,
    Path(p): Path<ProfilePath>,
) -> Result<Json<Vec<api::GoalDto>>, AppError> {
    let rows = state.store.list_goals(&p.hid, &p.pid).await?;
    Ok(Json(dto::all(rows, dto::goal)?))
}

async fn api_create_goal(
    State(state): State<AppState>,
    Extension(session): Extension<SessionCtx>,
    Path(p): Path<ProfilePath>,
    Json(body): Json<api::CreateGoalReq>,
) -> Result<Json<api::GoalDto>, AppError> {
    let (_, limits) = state.household_limits(&p.hid).await?;
    let open = state.store.count_open_goals(&p.hid).await?;
    limits.check_goals(open)?;
    // Goals proposed by a child wait for a parent
    let status = if session.is_parent() {
        GoalStatus::Active
    } else {
        GoalStatus::PendingApproval
    };
    let goal = state
        .store
        .create_goal(&p.hid, &p.pid, &body.title, body.target_stars, status)
        .await?;
    Ok(Json(dto::goal(goal)?))
}

async fn api_goal_action(
    State(state): State<AppState>,
    Path(p): Path<GoalActionPath>,
    body: Bytes,
) -> Result<Json<api::GoalDto>, AppError> {
    let goal = match p.action.as_str() {
        "approve" => {
            state
                .store
                .transition_goal(&p.hid, &p.gid, GoalStatus::Active)
                .await?
        }
        "reject" => {
            state
                .store
                .transition_goal(&p.hid, &p.gid, GoalStatus::Rejected)
                .await?
        }
        "progress" => {
            let req: api::GoalProgressReq = serde_json::from_slice(&body)
                .map_err(|e| AppError::bad_request(format!("invalid progress body: {e}")))?;
            state
                .store
                .record_goal_progress(&p.hid, &p.gid, req.stars)
                .await?
        }
        other => return Err(AppError::bad_request(format!("unknown action: {other}"))),
    };
    Ok(Json(dto::goal(goal)?))
}

/// Action endpoints accept an empty body in place of `{}`.
fn json_or_default<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::bad_request(format!("invalid body: {e}")))
}

fn hash_pin(pin: &str) -> Result<String, AppError> {
    if !(4..=8).contains(&pin.len()) || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::bad_request("pin must be 4 to 8 digits"));
    }
    bcrypt::hash(pin, PIN_HASH_COST).map_err(AppError::internal)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Conflict(String),
    LimitExceeded(String),
    Unprocessable(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn conflict<T: Into<String>>(msg: T) -> Self {
        Self::Conflict(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(m) => AppError::NotFound(m),
            StorageError::InvalidInput(m) => AppError::BadRequest(m),
            StorageError::Conflict(m) => AppError::Conflict(m),
            StorageError::Rejected(m) => AppError::Unprocessable(m),
            other => AppError::internal(other),
        }
    }
}

impl From<LimitExceeded> for AppError {
    fn from(e: LimitExceeded) -> Self {
        AppError::LimitExceeded(e.to_string())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m, "conflict", None),
            AppError::LimitExceeded(m) => {
                (StatusCode::UNPROCESSABLE_ENTITY, m, "limit_exceeded", None)
            }
            AppError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m, "rejected", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::error!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg, kind });
        (status, body).into_response()
    }
}
