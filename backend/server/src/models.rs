use chrono::{DateTime, NaiveDate, Utc};
use levels::{CourseType, Level};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub whatsapp_number: String,
    pub aadhar_number: String,
    pub dob: NaiveDate,
    pub anniversary_date: Option<NaiveDate>,
    pub avatar_url: Option<String>,
    /// Member number printed on the card, assigned on first approval.
    pub custom_id: Option<String>,
    pub is_approved: bool,
    pub total_points: i64,
    pub paid_referrals: u32,
    pub free_referrals: u32,
    pub current_level: Level,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub course_type: CourseType,
    pub points: u32,
    pub price: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Approved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Referral {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub course_id: Uuid,
    pub student_name: String,
    pub student_contact: String,
    pub student_aadhar: String,
    pub status: ReferralStatus,
    pub points_earned: u32,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct Lookup {
    pub whatsapp_number: String,
}

#[derive(Deserialize)]
pub struct Registration {
    pub full_name: String,
    pub whatsapp_number: String,
    pub aadhar_number: String,
    pub dob: NaiveDate,
    pub anniversary_date: Option<NaiveDate>,
}

#[derive(Deserialize, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub dob: Option<NaiveDate>,
    pub anniversary_date: Option<NaiveDate>,
}

#[derive(Deserialize, Default)]
pub struct AdminUserUpdate {
    pub full_name: Option<String>,
    pub whatsapp_number: Option<String>,
    pub aadhar_number: Option<String>,
    pub dob: Option<NaiveDate>,
    pub is_approved: Option<bool>,
    pub total_points: Option<i64>,
}

/// Field-level edits applied by the store inside its own lock. Fields left `None`
/// keep whatever the stored record holds at that moment.
#[derive(Debug, Default, Clone)]
pub struct UserChanges {
    pub full_name: Option<String>,
    pub whatsapp_number: Option<String>,
    pub aadhar_number: Option<String>,
    pub dob: Option<NaiveDate>,
    pub anniversary_date: Option<NaiveDate>,
    pub avatar_url: Option<String>,
    pub is_approved: Option<bool>,
    pub total_points: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct Search {
    pub q: Option<String>,
}

#[derive(Deserialize)]
pub struct NewReferral {
    pub referrer_id: Uuid,
    pub course_id: Uuid,
    pub student_name: String,
    pub student_contact: String,
    pub student_aadhar: String,
}

#[derive(Deserialize)]
pub struct CourseForm {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub course_type: CourseType,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}

/// Course columns shown next to a referral.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseSummary {
    pub name: String,
    pub course_type: CourseType,
    pub points: u32,
}

impl From<&Course> for CourseSummary {
    fn from(course: &Course) -> Self {
        Self {
            name: course.name.clone(),
            course_type: course.course_type,
            points: course.points,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferralView {
    #[serde(flatten)]
    pub referral: Referral,
    pub course: Option<CourseSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer_name: Option<String>,
}
