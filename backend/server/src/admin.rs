//! # Admin Console
//!
//! Every route here sits behind [`require_admin`], a bearer token compared against
//! the configured admin secret.
//!
//! ## Search
//! The user and pending referral lists take an optional `?q=`. The query is lowercased
//! and stripped of whitespace, then matched as a substring of the same normalization of
//! - users: name, WhatsApp number, Aadhaar number, member number
//! - referrals: student name, student contact, student Aadhaar, referrer name
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, Request, State as Extract},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use levels::CourseType;
use tracing::info;
use uuid::Uuid;

use crate::{
    analytics::{self, MONTHS},
    error::AppError,
    models::{
        AdminUserUpdate, Course, CourseForm, ReferralStatus, ReferralView, Search, User,
        UserChanges,
    },
    routes::referral_views,
    state::State,
    utils::{checked_aadhar, checked_phone, matches_key, require_bearer, required, search_key},
};

type Shared = Extract<Arc<State>>;

pub async fn require_admin(
    Extract(state): Shared,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    require_bearer(request.headers(), &state.config.admin_token)?;

    Ok(next.run(request).await)
}

fn user_matches(user: &User, key: &str) -> bool {
    [
        Some(user.full_name.as_str()),
        Some(user.whatsapp_number.as_str()),
        Some(user.aadhar_number.as_str()),
        user.custom_id.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| matches_key(field, key))
}

fn referral_matches(view: &ReferralView, key: &str) -> bool {
    let referral = &view.referral;

    [
        Some(referral.student_name.as_str()),
        Some(referral.student_contact.as_str()),
        Some(referral.student_aadhar.as_str()),
        view.referrer_name.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| matches_key(field, key))
}

fn search_users(users: Vec<User>, search: &Search) -> Vec<User> {
    match search_key(search.q.as_deref()) {
        Some(key) => users
            .into_iter()
            .filter(|user| user_matches(user, &key))
            .collect(),
        None => users,
    }
}

pub async fn users_handler(
    Extract(state): Shared,
    Query(search): Query<Search>,
) -> Result<Json<Vec<User>>, AppError> {
    let mut users = search_users(state.store.users().await?, &search);
    users.sort_by(|a, b| b.total_points.cmp(&a.total_points));

    Ok(Json(users))
}

pub async fn pending_users_handler(
    Extract(state): Shared,
    Query(search): Query<Search>,
) -> Result<Json<Vec<User>>, AppError> {
    let pending = state
        .store
        .users()
        .await?
        .into_iter()
        .filter(|user| !user.is_approved)
        .collect();

    let mut users = search_users(pending, &search);
    users.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(users))
}

pub async fn approve_user_handler(
    Extract(state): Shared,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, AppError> {
    let changes = UserChanges {
        is_approved: Some(true),
        ..UserChanges::default()
    };

    let user = state.store.update_user(id, changes).await?;
    info!("Approved promoter {id} as {}", user.custom_id.as_deref().unwrap_or("-"));

    Ok(Json(user))
}

pub async fn update_user_handler(
    Extract(state): Shared,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdminUserUpdate>,
) -> Result<Json<User>, AppError> {
    let changes = UserChanges {
        full_name: payload
            .full_name
            .map(|full_name| required("full_name", &full_name))
            .transpose()?,
        whatsapp_number: payload
            .whatsapp_number
            .map(|phone| checked_phone(&phone))
            .transpose()?,
        aadhar_number: payload
            .aadhar_number
            .map(|aadhar| checked_aadhar(&aadhar))
            .transpose()?,
        dob: payload.dob,
        is_approved: payload.is_approved,
        total_points: payload.total_points,
        ..UserChanges::default()
    };

    Ok(Json(state.store.update_user(id, changes).await?))
}

pub async fn delete_user_handler(
    Extract(state): Shared,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let removed = state.store.delete_user(id).await?;
    info!("Deleted promoter {id} with {removed} referrals");

    Ok(StatusCode::NO_CONTENT)
}

pub async fn pending_referrals_handler(
    Extract(state): Shared,
    Query(search): Query<Search>,
) -> Result<Json<Vec<ReferralView>>, AppError> {
    let pending = state
        .store
        .referrals()
        .await?
        .into_iter()
        .filter(|referral| referral.status == ReferralStatus::Pending)
        .collect();

    let mut views = referral_views(&state, pending, true).await?;
    if let Some(key) = search_key(search.q.as_deref()) {
        views.retain(|view| referral_matches(view, &key));
    }

    Ok(Json(views))
}

pub async fn verify_referral_handler(
    Extract(state): Shared,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (referral, user) = state.store.verify_referral(id, Utc::now()).await?;
    info!(
        "Verified referral {id}: +{} for {} ({} total, {})",
        referral.points_earned, user.id, user.total_points, user.current_level
    );

    Ok(Json(serde_json::json!({ "referral": referral, "user": user })))
}

pub async fn all_courses_handler(Extract(state): Shared) -> Result<Json<Vec<Course>>, AppError> {
    let mut courses = state.store.courses().await?;
    courses.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(courses))
}

/// Points follow the course type, price only applies to paid courses.
fn apply(course: &mut Course, form: CourseForm) -> Result<(), AppError> {
    course.name = required("name", &form.name)?;
    course.description = form.description.trim().to_string();
    course.course_type = form.course_type;
    course.points = form.course_type.points();
    course.price = match form.course_type {
        CourseType::Paid if form.price.is_finite() => form.price.max(0.0),
        CourseType::Paid => 0.0,
        CourseType::Free => 0.0,
    };
    course.is_active = form.is_active;

    Ok(())
}

pub async fn create_course_handler(
    Extract(state): Shared,
    Json(form): Json<CourseForm>,
) -> Result<impl IntoResponse, AppError> {
    let mut course = Course {
        id: Uuid::new_v4(),
        name: String::new(),
        description: String::new(),
        course_type: form.course_type,
        points: 0,
        price: 0.0,
        is_active: true,
        created_at: Utc::now(),
    };
    apply(&mut course, form)?;

    let course = state.store.insert_course(course).await?;
    info!("Created course {} ({})", course.name, course.course_type);

    Ok((StatusCode::CREATED, Json(course)))
}

pub async fn update_course_handler(
    Extract(state): Shared,
    Path(id): Path<Uuid>,
    Json(form): Json<CourseForm>,
) -> Result<Json<Course>, AppError> {
    let mut course = state
        .store
        .course(id)
        .await?
        .ok_or(AppError::NotFound("course"))?;
    apply(&mut course, form)?;

    Ok(Json(state.store.update_course(course).await?))
}

pub async fn delete_course_handler(
    Extract(state): Shared,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.store.delete_course(id).await?;
    info!("Deleted course {id}");

    Ok(StatusCode::NO_CONTENT)
}

pub async fn stats_handler(Extract(state): Shared) -> Result<impl IntoResponse, AppError> {
    let users = state.store.users().await?;
    let referrals = state.store.referrals().await?;

    Ok(Json(analytics::stats(&users, &referrals)))
}

pub async fn monthly_handler(Extract(state): Shared) -> Result<impl IntoResponse, AppError> {
    let referrals = state.store.referrals().await?;
    let courses = state.store.courses().await?;

    Ok(Json(analytics::monthly(&referrals, &courses, Utc::now(), MONTHS)))
}
