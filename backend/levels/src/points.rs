//! Points credited per approved referral.
//!
//! Points are fixed per course type. Admins pick the type when saving a course and the
//! course's stored point value follows from it.
use std::fmt;

use serde::{Deserialize, Serialize};

pub const PAID_POINTS: u32 = 10;
pub const FREE_POINTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseType {
    Paid,
    Free,
}

impl CourseType {
    pub const fn points(self) -> u32 {
        match self {
            CourseType::Paid => PAID_POINTS,
            CourseType::Free => FREE_POINTS,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CourseType::Paid => "paid",
            CourseType::Free => "free",
        }
    }
}

impl fmt::Display for CourseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
