//! License tiers and the numeric ceilings they grant.
//!
//! Limits are advisory: callers count what exists, compare against the
//! ceiling and only then write. Two concurrent creations may both pass the
//! check, so a household can transiently sit above its quota.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum LicenseTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl LicenseTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseTier::Free => "free",
            LicenseTier::Pro => "pro",
            LicenseTier::Enterprise => "enterprise",
        }
    }

    pub fn limits(self) -> Limits {
        get_limits(self)
    }
}

impl fmt::Display for LicenseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseTier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(LicenseTier::Free),
            "pro" => Ok(LicenseTier::Pro),
            "enterprise" => Ok(LicenseTier::Enterprise),
            other => Err(format!("unknown license tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub max_children: u32,
    pub max_total_routines: u32,
    pub max_total_goals: u32,
    pub can_customize_rewards: bool,
    pub can_access_analytics: bool,
    pub allowed_themes: Vec<String>,
    pub allowed_avatars: Vec<String>,
}

const FREE_THEMES: &[&str] = &["sunny"];
const PRO_THEMES: &[&str] = &["sunny", "ocean", "forest", "space", "candy"];
const FREE_AVATARS: &[&str] = &["bear", "cat", "dog", "owl"];
const PRO_AVATARS: &[&str] = &[
    "bear", "cat", "dog", "owl", "fox", "panda", "lion", "rabbit", "turtle", "whale", "robot",
    "unicorn",
];

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Maps a license tier to its limits.
///
/// Enterprise has no limits of its own yet and resolves to the pro set.
pub fn get_limits(tier: LicenseTier) -> Limits {
    match tier {
        LicenseTier::Free => Limits {
            max_children: 2,
            max_total_routines: 5,
            max_total_goals: 3,
            can_customize_rewards: false,
            can_access_analytics: false,
            allowed_themes: owned(FREE_THEMES),
            allowed_avatars: owned(FREE_AVATARS),
        },
        LicenseTier::Pro | LicenseTier::Enterprise => Limits {
            max_children: 6,
            max_total_routines: 50,
            max_total_goals: 20,
            can_customize_rewards: true,
            can_access_analytics: true,
            allowed_themes: owned(PRO_THEMES),
            allowed_avatars: owned(PRO_AVATARS),
        },
    }
}

/// A creation or customization the household's tier does not permit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitExceeded {
    #[error("your plan allows at most {max} child profiles")]
    Children { max: u32 },
    #[error("your plan allows at most {max} routines")]
    Routines { max: u32 },
    #[error("your plan allows at most {max} open goals")]
    Goals { max: u32 },
    #[error("custom rewards require an upgraded plan")]
    RewardCustomization,
    #[error("analytics require an upgraded plan")]
    Analytics,
    #[error("theme '{0}' is not available on your plan")]
    Theme(String),
    #[error("avatar '{0}' is not available on your plan")]
    Avatar(String),
}

impl Limits {
    /// `current` is the number of child profiles that already exist.
    pub fn check_children(&self, current: i64) -> Result<(), LimitExceeded> {
        if current >= i64::from(self.max_children) {
            return Err(LimitExceeded::Children {
                max: self.max_children,
            });
        }
        Ok(())
    }

    pub fn check_routines(&self, current: i64) -> Result<(), LimitExceeded> {
        if current >= i64::from(self.max_total_routines) {
            return Err(LimitExceeded::Routines {
                max: self.max_total_routines,
            });
        }
        Ok(())
    }

    /// `current` counts goals still pending approval or active.
    pub fn check_goals(&self, current: i64) -> Result<(), LimitExceeded> {
        if current >= i64::from(self.max_total_goals) {
            return Err(LimitExceeded::Goals {
                max: self.max_total_goals,
            });
        }
        Ok(())
    }

    pub fn check_reward_customization(&self) -> Result<(), LimitExceeded> {
        if self.can_customize_rewards {
            Ok(())
        } else {
            Err(LimitExceeded::RewardCustomization)
        }
    }

    pub fn check_analytics(&self) -> Result<(), LimitExceeded> {
        if self.can_access_analytics {
            Ok(())
        } else {
            Err(LimitExceeded::Analytics)
        }
    }

    pub fn check_theme(&self, theme: &str) -> Result<(), LimitExceeded> {
        if self.allowed_themes.iter().any(|t| t == theme) {
            Ok(())
        } else {
            Err(LimitExceeded::Theme(theme.to_string()))
        }
    }

    pub fn check_avatar(&self, avatar: &str) -> Result<(), LimitExceeded> {
        if self.allowed_avatars.iter().any(|a| a == avatar) {
            Ok(())
        } else {
            Err(LimitExceeded::Avatar(avatar.to_string()))
        }
    }

    pub fn default_theme(&self) -> &str {
        self.allowed_themes.first().map(String::as_str).unwrap_or("sunny")
    }

    pub fn default_avatar(&self) -> &str {
        self.allowed_avatars.first().map(String::as_str).unwrap_or("bear")
    }
}
