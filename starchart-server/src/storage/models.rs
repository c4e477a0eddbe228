use crate::storage::schema::{
    activities, activity_assignees, activity_logs, goals, household_members, households,
    inbox_items, profiles, purchase_logs, reward_assignees, rewards, sessions,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use starchart_shared::policy::LicenseTier;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = households)]
pub struct Household {
    pub id: String,
    pub license: String,
    pub license_expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl Household {
    pub fn license_tier(&self) -> LicenseTier {
        // Unknown values come from hand-edited rows; treat them as free.
        self.license.parse().unwrap_or_default()
    }

    /// The tier the household currently gets: a lapsed license falls back to
    /// free.
    pub fn effective_tier(&self, now: NaiveDateTime) -> LicenseTier {
        match self.license_expires_at {
            Some(exp) if exp <= now => LicenseTier::Free,
            _ => self.license_tier(),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = households)]
pub struct NewHousehold<'a> {
    pub id: &'a str,
    pub license: &'a str,
    pub license_expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = household_members)]
pub struct NewHouseholdMember<'a> {
    pub household_id: &'a str,
    pub username: &'a str,
    pub joined_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = profiles)]
#[diesel(belongs_to(Household, foreign_key = household_id))]
pub struct Profile {
    pub id: String,
    pub household_id: String,
    pub kind: String,
    pub display_name: String,
    pub avatar: String,
    pub theme: String,
    pub stars: i32,
    pub xp: i32,
    pub pin_hash: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = profiles)]
pub struct NewProfile<'a> {
    pub id: &'a str,
    pub household_id: &'a str,
    pub kind: &'a str,
    pub display_name: &'a str,
    pub avatar: &'a str,
    pub theme: &'a str,
    pub stars: i32,
    pub xp: i32,
    pub pin_hash: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

/// Partial profile update; `None` fields are left untouched.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = profiles)]
pub struct ProfileChanges {
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub theme: Option<String>,
    pub pin_hash: Option<Option<String>>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = activities)]
pub struct Activity {
    pub id: String,
    pub household_id: String,
    pub name: String,
    pub steps: String,
    pub schedule: String,
    pub stars: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = activities)]
pub struct NewActivity<'a> {
    pub id: &'a str,
    pub household_id: &'a str,
    pub name: &'a str,
    pub steps: &'a str,
    pub schedule: &'a str,
    pub stars: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = activity_assignees)]
pub struct NewActivityAssignee<'a> {
    pub activity_id: &'a str,
    pub profile_id: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = rewards)]
pub struct Reward {
    pub id: String,
    pub household_id: String,
    pub name: String,
    pub cost: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = rewards)]
pub struct NewReward<'a> {
    pub id: &'a str,
    pub household_id: &'a str,
    pub name: &'a str,
    pub cost: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = reward_assignees)]
pub struct NewRewardAssignee<'a> {
    pub reward_id: &'a str,
    pub profile_id: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = activity_logs)]
#[diesel(belongs_to(Profile, foreign_key = profile_id))]
pub struct ActivityLog {
    pub id: i32,
    pub household_id: String,
    pub profile_id: String,
    pub activity_id: Option<String>,
    pub kind: String,
    pub status: String,
    pub stars_earned: i32,
    pub detail: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = activity_logs)]
pub struct NewActivityLog<'a> {
    pub household_id: &'a str,
    pub profile_id: &'a str,
    pub activity_id: Option<&'a str>,
    pub kind: &'a str,
    pub status: &'a str,
    pub stars_earned: i32,
    pub detail: &'a str,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = purchase_logs)]
#[diesel(belongs_to(Profile, foreign_key = profile_id))]
pub struct PurchaseLog {
    pub id: i32,
    pub household_id: String,
    pub profile_id: String,
    pub reward_id: String,
    pub reward_name: String,
    pub reward_cost: i32,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = purchase_logs)]
pub struct NewPurchaseLog<'a> {
    pub household_id: &'a str,
    pub profile_id: &'a str,
    pub reward_id: &'a str,
    pub reward_name: &'a str,
    pub reward_cost: i32,
    pub status: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = goals)]
#[diesel(belongs_to(Profile, foreign_key = profile_id))]
pub struct Goal {
    pub id: String,
    pub household_id: String,
    pub profile_id: String,
    pub title: String,
    pub target_stars: i32,
    pub progress: i32,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = goals)]
pub struct NewGoal<'a> {
    pub id: &'a str,
    pub household_id: &'a str,
    pub profile_id: &'a str,
    pub title: &'a str,
    pub target_stars: i32,
    pub progress: i32,
    pub status: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = inbox_items)]
#[diesel(belongs_to(Profile, foreign_key = profile_id))]
pub struct InboxItem {
    pub id: i32,
    pub household_id: String,
    pub profile_id: String,
    pub stars: i32,
    pub reason: String,
    pub granted_by: String,
    pub created_at: NaiveDateTime,
    pub claimed_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = inbox_items)]
pub struct NewInboxItem<'a> {
    pub household_id: &'a str,
    pub profile_id: &'a str,
    pub stars: i32,
    pub reason: &'a str,
    pub granted_by: &'a str,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(jti))]
pub struct Session {
    pub jti: String,
    pub username: String,
    pub household_id: String,
    pub active_profile_id: Option<String>,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub username: &'a str,
    pub household_id: &'a str,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}
