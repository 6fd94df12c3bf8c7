//! Learning stages within an episode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The five stages every episode walks through, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Discover,
    Explore,
    Practice,
    Apply,
    Master,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Discover,
        Stage::Explore,
        Stage::Practice,
        Stage::Apply,
        Stage::Master,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Explore => "explore",
            Self::Practice => "practice",
            Self::Apply => "apply",
            Self::Master => "master",
        }
    }

    /// The following stage, or `None` at [`Stage::Master`].
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Discover => Some(Self::Explore),
            Self::Explore => Some(Self::Practice),
            Self::Practice => Some(Self::Apply),
            Self::Apply => Some(Self::Master),
            Self::Master => None,
        }
    }

    /// The preceding stage, or `None` at [`Stage::Discover`].
    pub fn prev(self) -> Option<Self> {
        match self {
            Self::Discover => None,
            Self::Explore => Some(Self::Discover),
            Self::Practice => Some(Self::Explore),
            Self::Apply => Some(Self::Practice),
            Self::Master => Some(Self::Apply),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
