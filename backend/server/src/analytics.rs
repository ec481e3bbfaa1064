//! # Analytics
//!
//! Admin console figures, computed from full table reads.
//!
//! - Totals only count approved promoters
//! - Monthly buckets count approved referrals by the month they were submitted in,
//!   oldest month first, current month last
use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use levels::CourseType;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Course, Referral, ReferralStatus, User};

pub const MONTHS: u32 = 6;
pub const TOP_PROMOTERS: usize = 5;

#[derive(Debug, Serialize)]
pub struct Stats {
    pub total_users: usize,
    pub pending_users: usize,
    pub total_points: i64,
    pub paid_referrals: u64,
    pub free_referrals: u64,
    pub pending_referrals: usize,
    pub top_promoters: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyStat {
    pub month: String,
    pub year: i32,
    pub paid: u32,
    pub free: u32,
    pub total: u32,
    pub points: u64,
}

pub fn stats(users: &[User], referrals: &[Referral]) -> Stats {
    let approved: Vec<&User> = users.iter().filter(|user| user.is_approved).collect();

    Stats {
        total_users: approved.len(),
        pending_users: users.len() - approved.len(),
        total_points: approved.iter().map(|user| user.total_points).sum(),
        paid_referrals: approved.iter().map(|user| u64::from(user.paid_referrals)).sum(),
        free_referrals: approved.iter().map(|user| u64::from(user.free_referrals)).sum(),
        pending_referrals: referrals
            .iter()
            .filter(|referral| referral.status == ReferralStatus::Pending)
            .count(),
        top_promoters: leaderboard(users, TOP_PROMOTERS),
    }
}

/// Approved promoters by points, highest first.
pub fn leaderboard(users: &[User], limit: usize) -> Vec<User> {
    let mut ranked: Vec<User> = users.iter().filter(|user| user.is_approved).cloned().collect();
    ranked.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then_with(|| a.full_name.cmp(&b.full_name))
    });
    ranked.truncate(limit);

    ranked
}

/// First day of the month `back` months before `now`'s month.
fn month_start(now: DateTime<Utc>, back: u32) -> Option<DateTime<Utc>> {
    let index = now.year() * 12 + now.month0() as i32 - back as i32;
    let date = NaiveDate::from_ymd_opt(index.div_euclid(12), index.rem_euclid(12) as u32 + 1, 1)?;

    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

pub fn monthly(
    referrals: &[Referral],
    courses: &[Course],
    now: DateTime<Utc>,
    months: u32,
) -> Vec<MonthlyStat> {
    let course_types: HashMap<Uuid, CourseType> = courses
        .iter()
        .map(|course| (course.id, course.course_type))
        .collect();

    (0..months)
        .rev()
        .filter_map(|back| month_start(now, back))
        .map(|start| bucket(referrals, &course_types, start))
        .collect()
}

fn bucket(
    referrals: &[Referral],
    course_types: &HashMap<Uuid, CourseType>,
    start: DateTime<Utc>,
) -> MonthlyStat {
    let mut stat = MonthlyStat {
        month: start.format("%b").to_string(),
        year: start.year(),
        paid: 0,
        free: 0,
        total: 0,
        points: 0,
    };

    let in_month = referrals.iter().filter(|referral| {
        referral.status == ReferralStatus::Approved
            && referral.created_at.year() == start.year()
            && referral.created_at.month() == start.month()
    });

    for referral in in_month {
        match course_types.get(&referral.course_id) {
            Some(CourseType::Paid) => stat.paid += 1,
            Some(CourseType::Free) => stat.free += 1,
            None => {}
        }
        stat.points += u64::from(referral.points_earned);
    }
    stat.total = stat.paid + stat.free;

    stat
}
