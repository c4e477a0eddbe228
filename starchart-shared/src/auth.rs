use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of a household profile. The active profile's kind decides what a
/// session may do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Parent,
    Child,
}

impl ProfileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Parent => "parent",
            ProfileKind::Child => "child",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parent" => Ok(ProfileKind::Parent),
            "child" => Ok(ProfileKind::Child),
            other => Err(format!("unknown profile kind: {other}")),
        }
    }
}
