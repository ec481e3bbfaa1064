//! # Levels
//!
//! Membership tiers for promoters.
//!
//! A promoter's tier is never stored as a source of truth. It is derived from the
//! cumulative point total every time that total changes, so the only inputs are the
//! total and the static table below.
//!
//! ## Tier Table
//!
//! | order | tier    | from  |
//! |-------|---------|-------|
//! | 1     | Bronze  | 0     |
//! | 2     | Silver  | 100   |
//! | 3     | Gold    | 250   |
//! | 4     | Diamond | 500   |
//! | 5     | Pearl   | 1000  |
//!
//! Older revisions used Initiator, Advocate, Guardian, Mentor and Luminary. Those names
//! still deserialize and map by rank, but are never produced.
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod badge;
pub mod points;

pub use badge::{Badge, Icon};
pub use points::CourseType;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    #[default]
    #[serde(alias = "Initiator")]
    Bronze,
    #[serde(alias = "Advocate")]
    Silver,
    #[serde(alias = "Guardian")]
    Gold,
    #[serde(alias = "Mentor")]
    Diamond,
    #[serde(alias = "Luminary")]
    Pearl,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Bronze,
        Level::Silver,
        Level::Gold,
        Level::Diamond,
        Level::Pearl,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Level::Bronze => "Bronze",
            Level::Silver => "Silver",
            Level::Gold => "Gold",
            Level::Diamond => "Diamond",
            Level::Pearl => "Pearl",
        }
    }

    /// 1-based rank, strictly increasing with [`Level::min_points`].
    pub const fn order(self) -> u8 {
        self as u8 + 1
    }

    pub const fn min_points(self) -> u64 {
        TIERS[self as usize].min_points
    }

    pub fn next(self) -> Option<Level> {
        Level::ALL.get(self as usize + 1).copied()
    }

    pub fn badge(self) -> Badge {
        Badge::for_level(self)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tier {
    pub level: Level,
    pub min_points: u64,
}

impl Tier {
    pub const fn name(&self) -> &'static str {
        self.level.name()
    }

    pub const fn order(&self) -> u8 {
        self.level.order()
    }

    /// Inclusive upper bound, `None` for the terminal tier.
    pub fn max_points(&self) -> Option<u64> {
        self.level.next().map(|next| next.min_points() - 1)
    }
}

/// Sorted by `min_points`, first entry starts at 0.
pub const TIERS: [Tier; 5] = [
    Tier { level: Level::Bronze, min_points: 0 },
    Tier { level: Level::Silver, min_points: 100 },
    Tier { level: Level::Gold, min_points: 250 },
    Tier { level: Level::Diamond, min_points: 500 },
    Tier { level: Level::Pearl, min_points: 1000 },
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub current_tier: Level,
    pub next_tier: Option<Level>,
    /// In `[0, 100]`, unrounded.
    pub progress_percent: f64,
    pub points_remaining: u64,
    pub points_into_tier: u64,
    pub next_threshold: Option<u64>,
}

fn clamp(total_points: i64) -> u64 {
    total_points.max(0) as u64
}

/// Highest tier whose lower bound does not exceed `total_points`. Negative totals count as 0.
pub fn classify(total_points: i64) -> Level {
    let points = clamp(total_points);
    let qualifying = TIERS.partition_point(|tier| tier.min_points <= points);

    TIERS[qualifying.saturating_sub(1)].level
}

pub fn progress(total_points: i64) -> Progress {
    let points = clamp(total_points);
    let current = classify(total_points);
    let points_into_tier = points - current.min_points();

    let Some(next) = current.next() else {
        return Progress {
            current_tier: current,
            next_tier: None,
            progress_percent: 100.0,
            points_remaining: 0,
            points_into_tier,
            next_threshold: None,
        };
    };

    let lo = current.min_points();
    let hi = next.min_points();
    let span = (hi - lo) as f64;

    Progress {
        current_tier: current,
        next_tier: Some(next),
        progress_percent: (points_into_tier as f64 / span * 100.0).min(100.0),
        points_remaining: hi.saturating_sub(points),
        points_into_tier,
        next_threshold: Some(hi),
    }
}
