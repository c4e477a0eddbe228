//! Row-to-wire conversions. Stored enum columns are parsed here; a value
//! that does not parse is reported as an internal error.

use chrono::NaiveDateTime;
use starchart_shared::api;
use starchart_shared::domain::{LogDetail, Schedule, Step};

use super::AppError;
use crate::storage::ChildSummary;
use crate::storage::models::{Activity, ActivityLog, Goal, InboxItem, Profile, PurchaseLog, Reward};

pub(super) fn rfc3339(dt: NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc).to_rfc3339()
}

pub(super) fn profile(p: Profile) -> Result<api::ProfileDto, AppError> {
    Ok(api::ProfileDto {
        kind: p.kind.parse().map_err(AppError::internal)?,
        has_pin: p.pin_hash.is_some(),
        id: p.id,
        display_name: p.display_name,
        avatar: p.avatar,
        theme: p.theme,
        stars: p.stars,
        xp: p.xp,
    })
}

pub(super) fn balance(p: &Profile) -> api::BalanceDto {
    api::BalanceDto {
        profile_id: p.id.clone(),
        stars: p.stars,
        xp: p.xp,
    }
}

pub(super) fn activity(a: Activity, profile_ids: Vec<String>) -> Result<api::ActivityDto, AppError> {
    let steps: Vec<Step> = serde_json::from_str(&a.steps).map_err(AppError::internal)?;
    let schedule: Schedule = serde_json::from_str(&a.schedule).map_err(AppError::internal)?;
    Ok(api::ActivityDto {
        id: a.id,
        name: a.name,
        steps,
        schedule,
        stars: a.stars,
        profile_ids,
    })
}

pub(super) fn activity_log(l: ActivityLog) -> Result<api::ActivityLogDto, AppError> {
    let detail: LogDetail = serde_json::from_str(&l.detail).map_err(AppError::internal)?;
    Ok(api::ActivityLogDto {
        status: l.status.parse().map_err(AppError::internal)?,
        time: rfc3339(l.created_at),
        id: l.id,
        profile_id: l.profile_id,
        activity_id: l.activity_id,
        stars_earned: l.stars_earned,
        detail,
    })
}

pub(super) fn reward(r: Reward, assigned_profile_ids: Vec<String>) -> api::RewardDto {
    api::RewardDto {
        id: r.id,
        name: r.name,
        cost: r.cost,
        assigned_profile_ids,
    }
}

pub(super) fn purchase(p: PurchaseLog) -> Result<api::PurchaseDto, AppError> {
    Ok(api::PurchaseDto {
        status: p.status.parse().map_err(AppError::internal)?,
        created_at: rfc3339(p.created_at),
        updated_at: rfc3339(p.updated_at),
        id: p.id,
        profile_id: p.profile_id,
        reward_id: p.reward_id,
        reward_name: p.reward_name,
        reward_cost: p.reward_cost,
    })
}

pub(super) fn inbox_item(i: InboxItem) -> api::InboxItemDto {
    api::InboxItemDto {
        created_at: rfc3339(i.created_at),
        claimed_at: i.claimed_at.map(rfc3339),
        id: i.id,
        profile_id: i.profile_id,
        stars: i.stars,
        reason: i.reason,
        granted_by: i.granted_by,
    }
}

pub(super) fn goal(g: Goal) -> Result<api::GoalDto, AppError> {
    Ok(api::GoalDto {
        status: g.status.parse().map_err(AppError::internal)?,
        created_at: rfc3339(g.created_at),
        id: g.id,
        profile_id: g.profile_id,
        title: g.title,
        target_stars: g.target_stars,
        progress: g.progress,
    })
}

pub(super) fn child_summary(s: ChildSummary) -> api::ChildSummaryDto {
    api::ChildSummaryDto {
        profile_id: s.profile.id,
        display_name: s.profile.display_name,
        stars: s.profile.stars,
        xp: s.profile.xp,
        completions: s.completions,
        stars_earned: s.stars_earned,
        purchases: s.purchases,
    }
}

/// Collects fallible conversions, stopping at the first failure.
pub(super) fn all<T, U>(
    rows: Vec<T>,
    f: impl FnMut(T) -> Result<U, AppError>,
) -> Result<Vec<U>, AppError> {
    rows.into_iter().map(f).collect()
}
