use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::policy::LicenseTier;

/// Household seeded from the server config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdSeed {
    pub id: String,
    #[serde(default)]
    pub license: LicenseTier,
    /// RFC3339; absent means the license never lapses.
    #[serde(default)]
    pub license_expires_at: Option<String>,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    #[default]
    Daily,
    Weekly {
        days: Vec<Weekday>,
    },
    Once,
}

macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Pending,
    Approved,
    Claimed,
    Rejected,
}

wire_enum!(PurchaseStatus {
    Pending => "pending",
    Approved => "approved",
    Claimed => "claimed",
    Rejected => "rejected",
});

impl PurchaseStatus {
    pub fn can_transition_to(self, next: PurchaseStatus) -> bool {
        matches!(
            (self, next),
            (PurchaseStatus::Pending, PurchaseStatus::Approved)
                | (PurchaseStatus::Pending, PurchaseStatus::Rejected)
                | (PurchaseStatus::Approved, PurchaseStatus::Claimed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    PendingApproval,
    Active,
    Completed,
    Rejected,
}

wire_enum!(GoalStatus {
    PendingApproval => "pending_approval",
    Active => "active",
    Completed => "completed",
    Rejected => "rejected",
});

impl GoalStatus {
    pub const ALL: [GoalStatus; 4] = [
        GoalStatus::PendingApproval,
        GoalStatus::Active,
        GoalStatus::Completed,
        GoalStatus::Rejected,
    ];

    pub fn can_transition_to(self, next: GoalStatus) -> bool {
        matches!(
            (self, next),
            (GoalStatus::PendingApproval, GoalStatus::Active)
                | (GoalStatus::PendingApproval, GoalStatus::Rejected)
                | (GoalStatus::Active, GoalStatus::Completed)
        )
    }

    /// Open goals count against the tier's goal ceiling.
    pub fn is_open(self) -> bool {
        matches!(self, GoalStatus::PendingApproval | GoalStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Completed,
    Partial,
}

wire_enum!(LogStatus {
    Completed => "completed",
    Partial => "partial",
});

/// Subtype-specific payload of an activity log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogDetail {
    ManualAward {
        reason: String,
        granted_by: String,
        inbox_item_id: i32,
    },
    RoutineCompletion {
        activity_name: String,
        steps_completed: u32,
        steps_total: u32,
    },
    GoalProgress {
        goal_id: String,
        progress: i32,
        target: i32,
    },
}

impl LogDetail {
    pub fn kind(&self) -> &'static str {
        match self {
            LogDetail::ManualAward { .. } => "manual_award",
            LogDetail::RoutineCompletion { .. } => "routine_completion",
            LogDetail::GoalProgress { .. } => "goal_progress",
        }
    }
}
