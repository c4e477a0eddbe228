use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::{API_V1_PREFIX, household_scope};

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

pub fn auth_login(base: &str) -> String {
    base_join(base, &format!("{}/auth/login", API_V1_PREFIX))
}
pub fn auth_logout(base: &str) -> String {
    base_join(base, &format!("{}/auth/logout", API_V1_PREFIX))
}
pub fn version(base: &str) -> String {
    base_join(base, &format!("{}/version", API_V1_PREFIX))
}
pub fn household_join(base: &str, household_id: &str) -> String {
    base_join(base, &format!("{}/join", household_scope(household_id)))
}
pub fn household(base: &str, household_id: &str) -> String {
    base_join(base, &format!("{}/household", household_scope(household_id)))
}
pub fn invite(base: &str, household_id: &str) -> String {
    base_join(base, &format!("{}/invite", household_scope(household_id)))
}
pub fn session(base: &str, household_id: &str) -> String {
    base_join(base, &format!("{}/session", household_scope(household_id)))
}
pub fn analytics(base: &str, household_id: &str) -> String {
    base_join(base, &format!("{}/analytics", household_scope(household_id)))
}
pub fn profiles(base: &str, household_id: &str) -> String {
    base_join(base, &format!("{}/profiles", household_scope(household_id)))
}
pub fn profile(base: &str, household_id: &str, profile_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/profiles/{}",
            household_scope(household_id),
            enc(profile_id)
        ),
    )
}
pub fn profile_switch(base: &str, household_id: &str, profile_id: &str) -> String {
    format!("{}/switch", profile(base, household_id, profile_id))
}
pub fn profile_activity_logs(base: &str, household_id: &str, profile_id: &str) -> String {
    format!("{}/activity-logs", profile(base, household_id, profile_id))
}
pub fn profile_complete_activity(
    base: &str,
    household_id: &str,
    profile_id: &str,
    activity_id: &str,
) -> String {
    format!(
        "{}/activities/{}/complete",
        profile(base, household_id, profile_id),
        enc(activity_id)
    )
}
pub fn profile_purchases(base: &str, household_id: &str, profile_id: &str) -> String {
    format!("{}/purchases", profile(base, household_id, profile_id))
}
pub fn profile_purchase_claim(
    base: &str,
    household_id: &str,
    profile_id: &str,
    purchase_id: i32,
) -> String {
    format!(
        "{}/purchases/{}/claim",
        profile(base, household_id, profile_id),
        purchase_id
    )
}
pub fn profile_inbox(base: &str, household_id: &str, profile_id: &str) -> String {
    format!("{}/inbox", profile(base, household_id, profile_id))
}
pub fn profile_inbox_claim(
    base: &str,
    household_id: &str,
    profile_id: &str,
    item_id: i32,
) -> String {
    format!(
        "{}/inbox/{}/claim",
        profile(base, household_id, profile_id),
        item_id
    )
}
pub fn profile_goals(base: &str, household_id: &str, profile_id: &str) -> String {
    format!("{}/goals", profile(base, household_id, profile_id))
}
pub fn activities(base: &str, household_id: &str) -> String {
    base_join(base, &format!("{}/activities", household_scope(household_id)))
}
pub fn activity(base: &str, household_id: &str, activity_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/activities/{}",
            household_scope(household_id),
            enc(activity_id)
        ),
    )
}
pub fn activity_assignees(base: &str, household_id: &str, activity_id: &str) -> String {
    format!("{}/assignees", activity(base, household_id, activity_id))
}
pub fn rewards(base: &str, household_id: &str) -> String {
    base_join(base, &format!("{}/rewards", household_scope(household_id)))
}
pub fn reward(base: &str, household_id: &str, reward_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/rewards/{}",
            household_scope(household_id),
            enc(reward_id)
        ),
    )
}
pub fn reward_assignees(base: &str, household_id: &str, reward_id: &str) -> String {
    format!("{}/assignees", reward(base, household_id, reward_id))
}
/// `action` is `approve` or `reject`.
pub fn purchase_action(base: &str, household_id: &str, purchase_id: i32, action: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/purchases/{}/{}",
            household_scope(household_id),
            purchase_id,
            action
        ),
    )
}
/// `action` is `approve`, `reject` or `progress`.
pub fn goal_action(base: &str, household_id: &str, goal_id: &str, action: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/goals/{}/{}",
            household_scope(household_id),
            enc(goal_id),
            action
        ),
    )
}
