use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::auth::ProfileKind;
use crate::domain::{GoalStatus, LogDetail, LogStatus, PurchaseStatus, Schedule, Step};
use crate::policy::{LicenseTier, Limits};

pub mod endpoints;

pub const API_V1_PREFIX: &str = "/api/v1";

/// Path prefix of every household-scoped endpoint.
pub fn household_scope(household_id: &str) -> String {
    format!(
        "{}/households/{}",
        API_V1_PREFIX,
        utf8_percent_encode(household_id, NON_ALPHANUMERIC)
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionDto {
    pub version: String,
}

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub household_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
    pub household_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionDto {
    pub username: String,
    pub household_id: String,
    pub active_profile: Option<ProfileDto>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SwitchProfileReq {
    #[serde(default)]
    pub pin: Option<String>,
}

// Household
#[derive(Debug, Serialize, Deserialize)]
pub struct HouseholdDto {
    pub id: String,
    pub license: LicenseTier,
    pub license_expires_at: Option<String>, // RFC3339 UTC
    pub effective_tier: LicenseTier,
    pub limits: Limits,
    pub members: Vec<String>,
    pub usage: UsageDto,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageDto {
    pub children: i64,
    pub routines: i64,
    pub open_goals: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InviteDto {
    pub household_id: String,
    pub url: String,
}

// Profiles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDto {
    pub id: String,
    pub kind: ProfileKind,
    pub display_name: String,
    pub avatar: String,
    pub theme: String,
    pub stars: i32,
    pub xp: i32,
    pub has_pin: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateProfileReq {
    pub kind: ProfileKind,
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub pin: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateProfileReq {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    /// Empty string removes the PIN.
    #[serde(default)]
    pub pin: Option<String>,
}

/// Rows touched by a cascading profile delete.
#[derive(Debug, Serialize, Deserialize)]
pub struct CascadeReportDto {
    pub profile_id: String,
    pub purchase_logs: usize,
    pub activity_logs: usize,
    pub goals: usize,
    pub inbox_items: usize,
    pub sessions_cleared: usize,
    pub activities_unassigned: usize,
    pub rewards_unassigned: usize,
}

// Activities
#[derive(Debug, Serialize, Deserialize)]
pub struct ActivityDto {
    pub id: String,
    pub name: String,
    pub steps: Vec<Step>,
    pub schedule: Schedule,
    pub stars: i32,
    pub profile_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateActivityReq {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub schedule: Schedule,
    pub stars: i32,
    #[serde(default)]
    pub profile_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssigneesReq {
    pub profile_ids: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CompleteActivityReq {
    /// Defaults to all steps.
    #[serde(default)]
    pub steps_completed: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivityLogDto {
    pub id: i32,
    pub profile_id: String,
    pub activity_id: Option<String>,
    pub status: LogStatus,
    pub stars_earned: i32,
    pub detail: LogDetail,
    pub time: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionResp {
    pub log: ActivityLogDto,
    pub balance: BalanceDto,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceDto {
    pub profile_id: String,
    pub stars: i32,
    pub xp: i32,
}

// Rewards
#[derive(Debug, Serialize, Deserialize)]
pub struct RewardDto {
    pub id: String,
    pub name: String,
    pub cost: i32,
    pub assigned_profile_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRewardReq {
    pub name: String,
    pub cost: i32,
    #[serde(default)]
    pub assigned_profile_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseReq {
    pub reward_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseDto {
    pub id: i32,
    pub profile_id: String,
    pub reward_id: String,
    pub reward_name: String,
    pub reward_cost: i32,
    pub status: PurchaseStatus,
    pub created_at: String, // RFC3339 UTC
    pub updated_at: String, // RFC3339 UTC
}

// Inbox
#[derive(Debug, Serialize, Deserialize)]
pub struct GrantReq {
    pub stars: i32,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InboxItemDto {
    pub id: i32,
    pub profile_id: String,
    pub stars: i32,
    pub reason: String,
    pub granted_by: String,
    pub created_at: String,         // RFC3339 UTC
    pub claimed_at: Option<String>, // RFC3339 UTC
}

// Goals
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateGoalReq {
    pub title: String,
    pub target_stars: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GoalDto {
    pub id: String,
    pub profile_id: String,
    pub title: String,
    pub target_stars: i32,
    pub progress: i32,
    pub status: GoalStatus,
    pub created_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GoalProgressReq {
    pub stars: i32,
}

// Analytics
#[derive(Debug, Serialize, Deserialize)]
pub struct ChildSummaryDto {
    pub profile_id: String,
    pub display_name: String,
    pub stars: i32,
    pub xp: i32,
    pub completions: i64,
    pub stars_earned: i64,
    pub purchases: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyticsDto {
    pub children: Vec<ChildSummaryDto>,
}
