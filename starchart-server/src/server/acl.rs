use super::{AppError, auth::SessionCtx};
use axum::response::Response;
use axum::{
    extract::OriginalUri,
    http::{Method, Request},
    middleware::Next,
};
use starchart_shared::auth::ProfileKind;
use starchart_shared::path::{household_id_from_path, profile_id_from_path};

pub async fn enforce_acl(req: Request<axum::body::Body>, next: Next) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(session) = req.extensions().get::<SessionCtx>() else {
        return Err(AppError::unauthorized());
    };

    if household_id_from_path(&path).as_deref() != Some(session.household_id()) {
        tracing::warn!(
            path = %path,
            household_id = %session.household_id(),
            "ACL: path outside the session's household"
        );
        return Err(AppError::forbidden());
    }
    // Skip "api", "v1", "households" and the household id
    let segs = segmented(&path);
    let rest = segs.get(4..).unwrap_or_default();

    let decision = match session.active_kind {
        _ if allow_any(&method, rest) => Ok(()),
        Some(ProfileKind::Parent) => allow_parent(&method, rest),
        Some(ProfileKind::Child) => allow_child(&method, rest, session, &path),
        None => Err(AppError::forbidden()),
    };

    if let Err(err) = decision {
        tracing::warn!(
            method = %method,
            path = %path,
            username = %session.username(),
            kind = ?session.active_kind,
            profile_id = ?session.active_profile_id(),
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

/// Routes open to every session of the household, even before a profile is
/// selected.
fn allow_any(method: &Method, rest: &[&str]) -> bool {
    matches!(
        (method, rest),
        (&Method::GET, ["session"])
            | (&Method::GET, ["profiles"])
            | (&Method::POST, ["profiles", _, "switch"])
    )
}

fn allow_parent(method: &Method, rest: &[&str]) -> Result<(), AppError> {
    match rest {
        ["household"] if *method == Method::GET => Ok(()),
        ["invite"] if *method == Method::GET => Ok(()),
        ["analytics"] if *method == Method::GET => Ok(()),
        ["profiles"] if *method == Method::POST => Ok(()),
        ["profiles", _] if *method == Method::PUT || *method == Method::DELETE => Ok(()),
        ["activities"] if *method == Method::GET || *method == Method::POST => Ok(()),
        ["activities", _] if *method == Method::DELETE => Ok(()),
        ["activities", _, "assignees"] if *method == Method::PUT => Ok(()),
        ["rewards"] if *method == Method::GET || *method == Method::POST => Ok(()),
        ["rewards", _] if *method == Method::DELETE => Ok(()),
        ["rewards", _, "assignees"] if *method == Method::PUT => Ok(()),
        ["purchases", id, action]
            if *method == Method::POST
                && (action == &"approve" || action == &"reject")
                && id.parse::<i32>().is_ok() =>
        {
            Ok(())
        }
        ["goals", _, action]
            if *method == Method::POST
                && (action == &"approve" || action == &"reject" || action == &"progress") =>
        {
            Ok(())
        }
        ["profiles", _, "inbox"] if *method == Method::GET || *method == Method::POST => Ok(()),
        ["profiles", _, "activity-logs"] if *method == Method::GET => Ok(()),
        ["profiles", _, "activities", _, "complete"] if *method == Method::POST => Ok(()),
        ["profiles", _, "purchases"] if *method == Method::GET || *method == Method::POST => Ok(()),
        ["profiles", _, "purchases", id, "claim"]
            if *method == Method::POST && id.parse::<i32>().is_ok() =>
        {
            Ok(())
        }
        ["profiles", _, "inbox", id, "claim"]
            if *method == Method::POST && id.parse::<i32>().is_ok() =>
        {
            Ok(())
        }
        ["profiles", _, "goals"] if *method == Method::GET || *method == Method::POST => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn allow_child(
    method: &Method,
    rest: &[&str],
    session: &SessionCtx,
    path: &str,
) -> Result<(), AppError> {
    match rest {
        ["activities"] if *method == Method::GET => Ok(()),
        ["rewards"] if *method == Method::GET => Ok(()),
        ["profiles", _, "activity-logs"] if *method == Method::GET => ensure_self(session, path),
        ["profiles", _, "activities", _, "complete"] if *method == Method::POST => {
            ensure_self(session, path)
        }
        ["profiles", _, "purchases"] if *method == Method::GET || *method == Method::POST => {
            ensure_self(session, path)
        }
        ["profiles", _, "purchases", id, "claim"]
            if *method == Method::POST && id.parse::<i32>().is_ok() =>
        {
            ensure_self(session, path)
        }
        ["profiles", _, "inbox"] if *method == Method::GET => ensure_self(session, path),
        ["profiles", _, "inbox", id, "claim"]
            if *method == Method::POST && id.parse::<i32>().is_ok() =>
        {
            ensure_self(session, path)
        }
        ["profiles", _, "goals"] if *method == Method::GET || *method == Method::POST => {
            ensure_self(session, path)
        }
        _ => Err(AppError::forbidden()),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// The profile addressed by the path must be the session's own.
fn ensure_self(session: &SessionCtx, path: &str) -> Result<(), AppError> {
    let expected = session.active_profile_id().ok_or_else(AppError::forbidden)?;
    match profile_id_from_path(path, session.household_id()) {
        Some(provided) if provided == expected => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}
