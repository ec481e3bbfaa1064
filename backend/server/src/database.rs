//! # Store
//!
//! Persistence collaborator for users, courses and referrals.
//!
//! Handlers never reach a global client. [`State`](crate::state::State) holds an
//! `Arc<dyn Store>` handed in at construction, which keeps routes testable against
//! [`MemoryStore`] and lets a hosted database sit behind the same trait.
//!
//! ## Requirements
//!
//! - Lookups by id and by WhatsApp number
//! - WhatsApp numbers are unique across users
//! - Deleting a user deletes every referral they made
//! - A course referenced by any referral cannot be deleted
//! - Verifying a referral credits its points exactly once
//! - Member numbers are handed out once, on first approval, and never reused
//!
//! ## Implementation
//!
//! - One `RwLock` over all three tables
//! - Verification runs under a single write guard: status flip, point credit,
//!   referral counter and level recompute land together or not at all
//! - User edits are [`UserChanges`], applied field by field to the record as it is
//!   under the guard. No caller writes back a whole user it read earlier, so an edit
//!   racing a verification cannot erase the credited points
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use levels::{CourseType, classify};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Course, Referral, ReferralStatus, User, UserChanges};

pub const MEMBER_PREFIX: &str = "CW";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn count_users(&self) -> Result<usize, StoreError>;

    async fn insert_user(&self, user: User) -> Result<User, StoreError>;

    async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn user_by_phone(&self, whatsapp_number: &str) -> Result<Option<User>, StoreError>;

    async fn users(&self) -> Result<Vec<User>, StoreError>;

    /// Applies `changes` to the current record. Setting `total_points` recomputes the
    /// level, approving assigns a member number if the user has none.
    async fn update_user(&self, id: Uuid, changes: UserChanges) -> Result<User, StoreError>;

    /// Removes the user and their referrals, returning how many referrals went with them.
    async fn delete_user(&self, id: Uuid) -> Result<usize, StoreError>;

    async fn insert_course(&self, course: Course) -> Result<Course, StoreError>;

    async fn course(&self, id: Uuid) -> Result<Option<Course>, StoreError>;

    async fn courses(&self) -> Result<Vec<Course>, StoreError>;

    async fn update_course(&self, course: Course) -> Result<Course, StoreError>;

    async fn delete_course(&self, id: Uuid) -> Result<(), StoreError>;

    async fn insert_referral(&self, referral: Referral) -> Result<Referral, StoreError>;

    async fn referrals(&self) -> Result<Vec<Referral>, StoreError>;

    async fn referrals_by(&self, referrer_id: Uuid) -> Result<Vec<Referral>, StoreError>;

    /// Approves a pending referral and credits the referrer with the course's points.
    async fn verify_referral(
        &self,
        id: Uuid,
        verified_at: DateTime<Utc>,
    ) -> Result<(Referral, User), StoreError>;
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    courses: HashMap<Uuid, Course>,
    referrals: HashMap<Uuid, Referral>,
    members: u32,
}

impl Tables {
    fn phone_taken(&self, whatsapp_number: &str, except: Option<Uuid>) -> bool {
        self.users
            .values()
            .any(|user| user.whatsapp_number == whatsapp_number && Some(user.id) != except)
    }

    fn next_member(&mut self) -> String {
        self.members += 1;

        format!("{MEMBER_PREFIX}{:05}", self.members)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn count_users(&self) -> Result<usize, StoreError> {
        Ok(self.tables.read().await.users.len())
    }

    async fn insert_user(&self, user: User) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;

        if tables.phone_taken(&user.whatsapp_number, None) {
            return Err(StoreError::Conflict(format!(
                "{} is already registered",
                user.whatsapp_number
            )));
        }

        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn user_by_phone(&self, whatsapp_number: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;

        Ok(tables
            .users
            .values()
            .find(|user| user.whatsapp_number == whatsapp_number)
            .cloned())
    }

    async fn users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.tables.read().await.users.values().cloned().collect())
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> Result<User, StoreError> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        let unnumbered = match tables.users.get(&id) {
            Some(user) => user.custom_id.is_none(),
            None => return Err(StoreError::NotFound("user")),
        };
        if let Some(phone) = &changes.whatsapp_number {
            if tables.phone_taken(phone, Some(id)) {
                return Err(StoreError::Conflict(format!("{phone} belongs to another user")));
            }
        }

        let member = (unnumbered && changes.is_approved == Some(true)).then(|| tables.next_member());
        let user = tables
            .users
            .get_mut(&id)
            .ok_or(StoreError::NotFound("user"))?;

        if let Some(full_name) = changes.full_name {
            user.full_name = full_name;
        }
        if let Some(phone) = changes.whatsapp_number {
            user.whatsapp_number = phone;
        }
        if let Some(aadhar) = changes.aadhar_number {
            user.aadhar_number = aadhar;
        }
        if let Some(dob) = changes.dob {
            user.dob = dob;
        }
        if changes.anniversary_date.is_some() {
            user.anniversary_date = changes.anniversary_date;
        }
        if changes.avatar_url.is_some() {
            user.avatar_url = changes.avatar_url;
        }
        if let Some(is_approved) = changes.is_approved {
            user.is_approved = is_approved;
        }
        if member.is_some() {
            user.custom_id = member;
        }
        if let Some(total_points) = changes.total_points {
            user.total_points = total_points.max(0);
            user.current_level = classify(user.total_points);
        }

        Ok(user.clone())
    }

    async fn delete_user(&self, id: Uuid) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;

        if tables.users.remove(&id).is_none() {
            return Err(StoreError::NotFound("user"));
        }

        let before = tables.referrals.len();
        tables.referrals.retain(|_, referral| referral.referrer_id != id);

        Ok(before - tables.referrals.len())
    }

    async fn insert_course(&self, course: Course) -> Result<Course, StoreError> {
        self.tables
            .write()
            .await
            .courses
            .insert(course.id, course.clone());

        Ok(course)
    }

    async fn course(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        Ok(self.tables.read().await.courses.get(&id).cloned())
    }

    async fn courses(&self) -> Result<Vec<Course>, StoreError> {
        Ok(self.tables.read().await.courses.values().cloned().collect())
    }

    async fn update_course(&self, course: Course) -> Result<Course, StoreError> {
        let mut tables = self.tables.write().await;

        match tables.courses.get_mut(&course.id) {
            Some(existing) => {
                *existing = course.clone();
                Ok(course)
            }
            None => Err(StoreError::NotFound("course")),
        }
    }

    async fn delete_course(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        if !tables.courses.contains_key(&id) {
            return Err(StoreError::NotFound("course"));
        }
        if tables.referrals.values().any(|referral| referral.course_id == id) {
            return Err(StoreError::Conflict(
                "course has referrals attached".to_string(),
            ));
        }

        tables.courses.remove(&id);
        Ok(())
    }

    async fn insert_referral(&self, referral: Referral) -> Result<Referral, StoreError> {
        let mut tables = self.tables.write().await;

        if !tables.users.contains_key(&referral.referrer_id) {
            return Err(StoreError::NotFound("user"));
        }
        if !tables.courses.contains_key(&referral.course_id) {
            return Err(StoreError::NotFound("course"));
        }

        tables.referrals.insert(referral.id, referral.clone());
        Ok(referral)
    }

    async fn referrals(&self) -> Result<Vec<Referral>, StoreError> {
        Ok(self.tables.read().await.referrals.values().cloned().collect())
    }

    async fn referrals_by(&self, referrer_id: Uuid) -> Result<Vec<Referral>, StoreError> {
        let tables = self.tables.read().await;

        Ok(tables
            .referrals
            .values()
            .filter(|referral| referral.referrer_id == referrer_id)
            .cloned()
            .collect())
    }

    async fn verify_referral(
        &self,
        id: Uuid,
        verified_at: DateTime<Utc>,
    ) -> Result<(Referral, User), StoreError> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        let referral = tables
            .referrals
            .get_mut(&id)
            .ok_or(StoreError::NotFound("referral"))?;

        if referral.status == ReferralStatus::Approved {
            return Err(StoreError::Conflict("referral already verified".to_string()));
        }

        let course = tables
            .courses
            .get(&referral.course_id)
            .ok_or(StoreError::NotFound("course"))?;
        let user = tables
            .users
            .get_mut(&referral.referrer_id)
            .ok_or(StoreError::NotFound("user"))?;

        referral.status = ReferralStatus::Approved;
        referral.points_earned = course.points;
        referral.verified_at = Some(verified_at);

        user.total_points += i64::from(course.points);
        match course.course_type {
            CourseType::Paid => user.paid_referrals += 1,
            CourseType::Free => user.free_referrals += 1,
        }
        user.current_level = classify(user.total_points);

        Ok((referral.clone(), user.clone()))
    }
}
