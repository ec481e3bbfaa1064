use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State as Extract},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
};
use chrono::{NaiveDate, Utc};
use levels::{Badge, Level, Progress, TIERS, progress};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    avatar::compress,
    error::AppError,
    models::{
        CourseSummary, Lookup, NewReferral, ProfileUpdate, Referral, ReferralStatus, ReferralView,
        Registration, User, UserChanges,
    },
    state::State,
    utils::{
        checked_aadhar, checked_phone, clean_phone, format_aadhar, is_celebration, require_bearer,
        required,
    },
};

pub const RECENT_REFERRALS: usize = 10;

type Shared = Extract<Arc<State>>;

#[derive(Serialize)]
pub struct TierView {
    pub order: u8,
    pub name: &'static str,
    pub min_points: u64,
    pub max_points: Option<u64>,
    pub badge: Badge,
}

#[derive(Serialize)]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    /// `1234 5678 9012`, as printed on the member card.
    pub aadhar_display: String,
    pub progress: Progress,
    pub badge: Badge,
    pub is_birthday: bool,
    pub is_anniversary: bool,
}

impl UserView {
    pub fn new(user: User, today: NaiveDate) -> Self {
        Self {
            aadhar_display: format_aadhar(&user.aadhar_number),
            progress: progress(user.total_points),
            badge: user.current_level.badge(),
            is_birthday: is_celebration(user.dob, today),
            is_anniversary: user
                .anniversary_date
                .is_some_and(|date| is_celebration(date, today)),
            user,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LookupResult {
    Unregistered,
    Pending { user: User },
    Approved { user: UserView },
}

#[derive(Deserialize)]
pub struct PointsQuery {
    pub points: Option<i64>,
}

pub async fn health_handler(Extract(state): Shared, headers: HeaderMap) -> impl IntoResponse {
    if let Some(secret) = &state.config.cron_secret {
        if require_bearer(&headers, secret).is_err() {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" })));
        }
    }

    let timestamp = Utc::now().to_rfc3339();

    match state.store.count_users().await {
        Ok(users) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("Store is alive ({users} users)"),
                "timestamp": timestamp,
            })),
        ),
        Err(e) => {
            warn!("Keep-alive ping failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string(), "timestamp": timestamp })),
            )
        }
    }
}

pub async fn levels_handler() -> impl IntoResponse {
    let tiers: Vec<TierView> = TIERS
        .iter()
        .map(|tier| TierView {
            order: tier.order(),
            name: tier.name(),
            min_points: tier.min_points,
            max_points: tier.max_points(),
            badge: tier.level.badge(),
        })
        .collect();

    Json(tiers)
}

pub async fn progress_handler(Query(query): Query<PointsQuery>) -> impl IntoResponse {
    Json(progress(query.points.unwrap_or(0)))
}

pub async fn lookup_handler(
    Extract(state): Shared,
    Json(payload): Json<Lookup>,
) -> Result<Json<LookupResult>, AppError> {
    let phone = clean_phone(&payload.whatsapp_number);
    if phone.is_empty() {
        return Err(AppError::MalformedPayload("whatsapp_number is required".to_string()));
    }

    let result = match state.store.user_by_phone(&phone).await? {
        None => LookupResult::Unregistered,
        Some(user) if !user.is_approved => LookupResult::Pending { user },
        Some(user) => LookupResult::Approved {
            user: UserView::new(user, Utc::now().date_naive()),
        },
    };

    Ok(Json(result))
}

pub async fn register_handler(
    Extract(state): Shared,
    Json(payload): Json<Registration>,
) -> Result<impl IntoResponse, AppError> {
    let user = User {
        id: Uuid::new_v4(),
        full_name: required("full_name", &payload.full_name)?,
        whatsapp_number: checked_phone(&payload.whatsapp_number)?,
        aadhar_number: checked_aadhar(&payload.aadhar_number)?,
        dob: payload.dob,
        anniversary_date: payload.anniversary_date,
        avatar_url: None,
        custom_id: None,
        is_approved: false,
        total_points: 0,
        paid_referrals: 0,
        free_referrals: 0,
        current_level: Level::default(),
        created_at: Utc::now(),
    };

    let user = state.store.insert_user(user).await?;
    info!("Registered promoter {} awaiting approval", user.id);

    Ok((StatusCode::CREATED, Json(user)))
}

pub(crate) async fn find_user(state: &State, id: Uuid) -> Result<User, AppError> {
    state.store.user(id).await?.ok_or(AppError::NotFound("user"))
}

pub async fn user_handler(
    Extract(state): Shared,
    Path(id): Path<Uuid>,
) -> Result<Json<UserView>, AppError> {
    let user = find_user(&state, id).await?;

    Ok(Json(UserView::new(user, Utc::now().date_naive())))
}

pub async fn update_profile_handler(
    Extract(state): Shared,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProfileUpdate>,
) -> Result<Json<User>, AppError> {
    let changes = UserChanges {
        full_name: payload
            .full_name
            .map(|full_name| required("full_name", &full_name))
            .transpose()?,
        dob: payload.dob,
        anniversary_date: payload.anniversary_date,
        ..UserChanges::default()
    };

    Ok(Json(state.store.update_user(id, changes).await?))
}

pub async fn avatar_handler(
    Extract(state): Shared,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<User>, AppError> {
    let user = find_user(&state, id).await?;

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let limit = state.config.avatar_limit;

    let avatar = tokio::task::spawn_blocking(move || compress(&body, &content_type, limit))
        .await
        .map_err(|e| AppError::InternalError(Box::new(e)))??;

    let name = format!("{}-{}.{}", user.id, Utc::now().timestamp_millis(), avatar.extension);
    let url = state.blobs.put(&name, avatar).await?;
    info!("Stored avatar {name} for {}", user.id);

    let changes = UserChanges {
        avatar_url: Some(url),
        ..UserChanges::default()
    };

    Ok(Json(state.store.update_user(id, changes).await?))
}

pub(crate) async fn referral_views(
    state: &State,
    mut referrals: Vec<Referral>,
    with_referrer: bool,
) -> Result<Vec<ReferralView>, AppError> {
    referrals.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut views = Vec::with_capacity(referrals.len());
    for referral in referrals {
        let course = state.store.course(referral.course_id).await?;
        let referrer_name = if with_referrer {
            state
                .store
                .user(referral.referrer_id)
                .await?
                .map(|user| user.full_name)
        } else {
            None
        };

        views.push(ReferralView {
            course: course.as_ref().map(CourseSummary::from),
            referral,
            referrer_name,
        });
    }

    Ok(views)
}

pub async fn user_referrals_handler(
    Extract(state): Shared,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ReferralView>>, AppError> {
    find_user(&state, id).await?;

    let mut views = referral_views(&state, state.store.referrals_by(id).await?, false).await?;
    views.truncate(RECENT_REFERRALS);

    Ok(Json(views))
}

pub async fn create_referral_handler(
    Extract(state): Shared,
    Json(payload): Json<NewReferral>,
) -> Result<impl IntoResponse, AppError> {
    let referrer = find_user(&state, payload.referrer_id).await?;
    if !referrer.is_approved {
        return Err(AppError::Forbidden("promoter is not approved yet".to_string()));
    }

    let course = state
        .store
        .course(payload.course_id)
        .await?
        .filter(|course| course.is_active)
        .ok_or_else(|| AppError::MalformedPayload("course is not available".to_string()))?;

    let referral = Referral {
        id: Uuid::new_v4(),
        referrer_id: referrer.id,
        course_id: course.id,
        student_name: required("student_name", &payload.student_name)?,
        student_contact: checked_phone(&payload.student_contact)?,
        student_aadhar: checked_aadhar(&payload.student_aadhar)?,
        status: ReferralStatus::Pending,
        points_earned: 0,
        created_at: Utc::now(),
        verified_at: None,
    };

    let referral = state.store.insert_referral(referral).await?;
    info!("Referral {} submitted by {}", referral.id, referrer.id);

    Ok((StatusCode::CREATED, Json(referral)))
}

pub async fn courses_handler(Extract(state): Shared) -> Result<impl IntoResponse, AppError> {
    let mut courses: Vec<_> = state
        .store
        .courses()
        .await?
        .into_iter()
        .filter(|course| course.is_active)
        .collect();
    courses.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(courses))
}
