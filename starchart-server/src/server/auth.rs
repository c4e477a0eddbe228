use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use starchart_shared::auth::ProfileKind;
use starchart_shared::jwt::{self, JwtClaims};
use tracing::{error, warn};

use super::{AppError, AppState};
use crate::storage::models::Profile;

/// How many days of inactivity before a session is considered expired.
const SESSION_IDLE_DAYS: i64 = 14;
/// How many days before mandatory re-login.
const TOKEN_TTL_DAYS: i64 = 30;

/// The caller's session, resolved from the bearer token on every request.
///
/// The active profile is re-read from the session row each time, so a
/// profile deleted by another session is never seen as active.
#[derive(Clone, Debug)]
pub struct SessionCtx {
    pub claims: JwtClaims,
    pub active_profile: Option<Profile>,
    pub active_kind: Option<ProfileKind>,
}

impl SessionCtx {
    pub fn username(&self) -> &str {
        &self.claims.sub
    }

    pub fn household_id(&self) -> &str {
        &self.claims.household_id
    }

    pub fn jti(&self) -> &str {
        &self.claims.jti
    }

    pub fn active_profile_id(&self) -> Option<&str> {
        self.active_profile.as_ref().map(|p| p.id.as_str())
    }

    pub fn is_parent(&self) -> bool {
        self.active_kind == Some(ProfileKind::Parent)
    }
}

pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let Some(token) = header_str.strip_prefix("Bearer ") else {
        return unauthorized();
    };

    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error=%e, "auth: jwt decode failed");
            return unauthorized();
        }
    };

    if state.config.find_user(&claims.sub).is_none() {
        warn!(username=%claims.sub, "auth: user no longer configured");
        return unauthorized();
    }

    let cutoff = Utc::now() - Duration::days(SESSION_IDLE_DAYS);
    match state
        .store
        .touch_session_with_cutoff(&claims.jti, cutoff.naive_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                jti = %claims.jti,
                username = %claims.sub,
                cutoff = %cutoff,
                idle_days = SESSION_IDLE_DAYS,
                "auth: session missing or expired (last_used_at < cutoff)"
            );
            return unauthorized();
        }
        Err(e) => {
            error!(jti = %claims.jti, error=%e, "auth: touch_session_with_cutoff failed");
            return Err(AppError::internal(e));
        }
    }

    let (session, active_profile) = match state.store.get_session(&claims.jti).await {
        Ok(Some(found)) => found,
        Ok(None) => return unauthorized(),
        Err(e) => {
            error!(jti = %claims.jti, error=%e, "auth: get_session failed");
            return Err(AppError::internal(e));
        }
    };
    if session.username != claims.sub || session.household_id != claims.household_id {
        warn!(
            jti = %claims.jti,
            username = %claims.sub,
            session_household = %session.household_id,
            token_household = %claims.household_id,
            "auth: token does not match its session"
        );
        return unauthorized();
    }

    let active_kind = active_profile
        .as_ref()
        .map(|p| p.kind.parse::<ProfileKind>())
        .transpose()
        .map_err(AppError::internal)?;

    req.extensions_mut().insert(SessionCtx {
        claims,
        active_profile,
        active_kind,
    });
    Ok(next.run(req).await)
}

/// Creates a session scoped to `household_id` and signs a token for it.
pub async fn issue_jwt_for_user(
    state: &AppState,
    username: &str,
    household_id: &str,
) -> Result<String, AppError> {
    if state.config.find_user(username).is_none() {
        warn!(username, "issue_jwt: unknown user");
        return Err(AppError::forbidden());
    }
    let jti = uuid::Uuid::new_v4().to_string();
    let exp = (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp();
    let claims = JwtClaims {
        sub: username.to_string(),
        jti: jti.clone(),
        exp,
        household_id: household_id.to_string(),
    };

    state
        .store
        .create_session(&jti, username, household_id)
        .await
        .map_err(|e| {
            error!(username, error=%e, "login/join: create_session failed");
            AppError::internal(e)
        })?;
    let token = jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(username, error=%e, "login/join: jwt encode failed");
        AppError::internal(e)
    })?;
    Ok(token)
}
