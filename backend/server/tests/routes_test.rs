use std::{
    io::Cursor,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::{Value, json};
use server::{
    avatar::{Avatar, AvatarError, BlobStore},
    config::Config,
    database::{MemoryStore, Store},
    router,
    state::State,
};
use tower::ServiceExt;
use uuid::Uuid;

const ADMIN: &str = "test-admin-token";

struct App {
    router: Router,
    state: Arc<State>,
}

impl App {
    fn new() -> Self {
        Self::with_state(State::in_memory(Config::with_admin_token(ADMIN)))
    }

    fn with_state(state: Arc<State>) -> Self {
        Self {
            router: router(state.clone()),
            state,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        self.send(request).await
    }

    async fn admin(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {ADMIN}"));

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };

        self.send(request.unwrap()).await
    }

    async fn register(&self, phone: &str) -> String {
        let (status, user) = self
            .json(
                "POST",
                "/users",
                json!({
                    "full_name": "Asha Menon",
                    "whatsapp_number": phone,
                    "aadhar_number": "1234 5678 9012",
                    "dob": "1991-04-09",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        user["id"].as_str().unwrap().to_string()
    }

    async fn approved_promoter(&self, phone: &str) -> String {
        let id = self.register(phone).await;
        let (status, _) = self
            .admin("POST", &format!("/admin/users/{id}/approve"), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        id
    }

    async fn course(&self, name: &str, course_type: &str) -> String {
        let (status, course) = self
            .admin(
                "POST",
                "/admin/courses",
                Some(json!({ "name": name, "course_type": course_type, "price": 4999.0 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        course["id"].as_str().unwrap().to_string()
    }

    async fn upload(&self, user: &str, content_type: &str, bytes: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::post(format!("/users/{user}/avatar"))
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(bytes))
            .unwrap();

        self.send(request).await
    }

    async fn refer(&self, referrer: &str, course: &str) -> (StatusCode, Value) {
        self.json(
            "POST",
            "/referrals",
            json!({
                "referrer_id": referrer,
                "course_id": course,
                "student_name": "Ravi Kumar",
                "student_contact": "+91 98765 43210",
                "student_aadhar": "210987654321",
            }),
        )
        .await
    }
}

#[tokio::test]
async fn levels_table_and_progress() {
    let app = App::new();

    let (status, tiers) = app.get("/levels").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tiers.as_array().unwrap().len(), 5);
    assert_eq!(tiers[0]["name"], "Bronze");
    assert_eq!(tiers[0]["max_points"], 99);
    assert_eq!(tiers[4]["name"], "Pearl");
    assert_eq!(tiers[4]["max_points"], Value::Null);

    let (_, progress) = app.get("/levels/progress?points=100").await;
    assert_eq!(progress["current_tier"], "Silver");
    assert_eq!(progress["next_tier"], "Gold");
    assert_eq!(progress["points_remaining"], 150);

    let (_, missing) = app.get("/levels/progress").await;
    assert_eq!(missing["current_tier"], "Bronze");
    assert_eq!(missing["points_remaining"], 100);
}

#[tokio::test]
async fn lookup_follows_registration_and_approval() {
    let app = App::new();
    let phone = "9876543210";

    let (_, before) = app
        .json("POST", "/users/lookup", json!({ "whatsapp_number": phone }))
        .await;
    assert_eq!(before["status"], "unregistered");

    let id = app.register(phone).await;
    let (_, pending) = app
        .json("POST", "/users/lookup", json!({ "whatsapp_number": " 98765 43210 " }))
        .await;
    assert_eq!(pending["status"], "pending");
    assert_eq!(pending["user"]["current_level"], "Bronze");

    app.admin("POST", &format!("/admin/users/{id}/approve"), None)
        .await;
    let (_, approved) = app
        .json("POST", "/users/lookup", json!({ "whatsapp_number": phone }))
        .await;
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["user"]["progress"]["next_tier"], "Silver");
    assert_eq!(approved["user"]["badge"]["class"], "badge-bronze");
}

#[tokio::test]
async fn registration_validates_and_rejects_duplicates() {
    let app = App::new();
    app.register("9876543210").await;

    let (status, _) = app
        .json(
            "POST",
            "/users",
            json!({
                "full_name": "Other",
                "whatsapp_number": "9876543210",
                "aadhar_number": "123456789012",
                "dob": "1990-01-01",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .json(
            "POST",
            "/users",
            json!({
                "full_name": "Short Aadhar",
                "whatsapp_number": "9123456789",
                "aadhar_number": "1234",
                "dob": "1990-01-01",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.as_str().unwrap().contains("12 digits"));

    let (status, _) = app
        .json(
            "POST",
            "/users",
            json!({
                "full_name": "   ",
                "whatsapp_number": "9123456789",
                "aadhar_number": "123456789012",
                "dob": "1990-01-01",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_require_token() {
    let app = App::new();

    let (status, _) = app.get("/admin/stats").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::get("/admin/stats")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.admin("GET", "/admin/stats", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unapproved_promoters_cannot_refer() {
    let app = App::new();
    let promoter = app.register("9876543210").await;
    let course = app.course("Tally", "free").await;

    let (status, _) = app.refer(&promoter, &course).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn inactive_courses_are_hidden_and_not_referable() {
    let app = App::new();
    let promoter = app.approved_promoter("9876543210").await;
    let course = app.course("Retired", "paid").await;

    let (status, _) = app
        .admin(
            "PUT",
            &format!("/admin/courses/{course}"),
            Some(json!({ "name": "Retired", "course_type": "paid", "is_active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, courses) = app.get("/courses").await;
    assert!(courses.as_array().unwrap().is_empty());

    let (status, _) = app.refer(&promoter, &course).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verifying_referrals_credits_points_and_levels() {
    let app = App::new();
    let promoter = app.approved_promoter("9876543210").await;
    let paid = app.course("Full Stack", "paid").await;
    let free = app.course("Spoken English", "free").await;

    let (status, course) = app.admin("GET", "/admin/courses", None).await;
    assert_eq!(status, StatusCode::OK);
    let paid_course = course
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["id"] == paid.as_str())
        .unwrap();
    assert_eq!(paid_course["points"], 10);
    assert_eq!(paid_course["price"], 4999.0);

    let mut referral_ids = Vec::new();
    for course in [&paid, &free] {
        let (status, referral) = app.refer(&promoter, course).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(referral["status"], "pending");
        assert_eq!(referral["student_contact"], "+919876543210");
        referral_ids.push(referral["id"].as_str().unwrap().to_string());
    }

    let (_, pending) = app.admin("GET", "/admin/referrals/pending", None).await;
    assert_eq!(pending.as_array().unwrap().len(), 2);
    assert_eq!(pending[0]["referrer_name"], "Asha Menon");

    for id in &referral_ids {
        let (status, _) = app
            .admin("POST", &format!("/admin/referrals/{id}/verify"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = app
        .admin(
            "POST",
            &format!("/admin/referrals/{}/verify", referral_ids[0]),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, user) = app.get(&format!("/users/{promoter}")).await;
    assert_eq!(user["total_points"], 12);
    assert_eq!(user["paid_referrals"], 1);
    assert_eq!(user["free_referrals"], 1);
    assert_eq!(user["progress"]["points_remaining"], 88);

    let (_, history) = app.get(&format!("/users/{promoter}/referrals")).await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r["status"] == "approved"));
    assert!(history.iter().any(|r| r["course"]["course_type"] == "paid"));

    let (_, stats) = app.admin("GET", "/admin/stats", None).await;
    assert_eq!(stats["total_points"], 12);
    assert_eq!(stats["pending_referrals"], 0);

    let (_, monthly) = app.admin("GET", "/admin/analytics/monthly", None).await;
    let monthly = monthly.as_array().unwrap();
    assert_eq!(monthly.len(), 6);
    assert_eq!(monthly[5]["total"], 2);
    assert_eq!(monthly[5]["points"], 12);
}

#[tokio::test]
async fn admin_point_edits_recompute_level() {
    let app = App::new();
    let promoter = app.approved_promoter("9876543210").await;

    let (status, user) = app
        .admin(
            "PATCH",
            &format!("/admin/users/{promoter}"),
            Some(json!({ "total_points": 640 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["current_level"], "Diamond");

    let (_, users) = app.admin("GET", "/admin/users", None).await;
    assert_eq!(users[0]["current_level"], "Diamond");
}

#[tokio::test]
async fn deleting_promoter_removes_referrals_and_frees_course() {
    let app = App::new();
    let promoter = app.approved_promoter("9876543210").await;
    let course = app.course("Tally", "free").await;
    app.refer(&promoter, &course).await;

    let (status, _) = app
        .admin("DELETE", &format!("/admin/courses/{course}"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .admin("DELETE", &format!("/admin/users/{promoter}"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get(&format!("/users/{promoter}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.state.store.referrals().await.unwrap().is_empty());

    let (status, _) = app
        .admin("DELETE", &format!("/admin/courses/{course}"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

/// Deterministic noise so image codecs cannot shrink it much.
fn noisy_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x2545_F491;
    let image = RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        image::Rgb([r, g, b])
    });

    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

#[tokio::test]
async fn avatar_upload_sets_public_url() {
    let app = App::new();
    let promoter = app.register("9876543210").await;

    let (status, user) = app.upload(&promoter, "image/png", noisy_png(32, 32)).await;
    assert_eq!(status, StatusCode::OK);

    let url = user["avatar_url"].as_str().unwrap();
    assert!(url.starts_with(&format!("http://localhost:1111/avatars/{promoter}-")));
    assert!(url.ends_with(".png"));

    let (status, _) = app.upload(&promoter, "application/pdf", vec![0u8; 16]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.upload(&promoter, "image/png", vec![0u8; 2048]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, user) = app.get(&format!("/users/{promoter}")).await;
    assert_eq!(user["avatar_url"].as_str(), Some(url));
}

#[tokio::test]
async fn avatar_that_cannot_be_compressed_is_too_large() {
    let mut config = Config::with_admin_token(ADMIN);
    config.avatar_limit = 1024;
    let app = App::with_state(State::in_memory(config));
    let promoter = app.register("9876543210").await;

    let (status, body) = app.upload(&promoter, "image/png", noisy_png(600, 600)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body.as_str().unwrap().contains("limit is 1024"));

    let (_, user) = app.get(&format!("/users/{promoter}")).await;
    assert_eq!(user["avatar_url"], Value::Null);
}

#[tokio::test]
async fn upload_over_body_limit_is_rejected() {
    let mut config = Config::with_admin_token(ADMIN);
    config.max_upload_bytes = 4096;
    let app = App::with_state(State::in_memory(config));
    let promoter = app.register("9876543210").await;

    let (status, _) = app.upload(&promoter, "image/png", noisy_png(128, 128)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

/// Verifies a referral from inside `put`, between the handler reading the user and
/// saving the avatar URL.
struct VerifyingBlobs {
    store: Arc<MemoryStore>,
    referral: Mutex<Option<Uuid>>,
}

#[async_trait]
impl BlobStore for VerifyingBlobs {
    async fn put(&self, name: &str, _avatar: Avatar) -> Result<String, AvatarError> {
        let referral = self.referral.lock().unwrap().take();

        if let Some(id) = referral {
            self.store
                .verify_referral(id, Utc::now())
                .await
                .map_err(|e| AvatarError::Storage(e.to_string()))?;
        }

        Ok(format!("https://cdn.example.com/{name}"))
    }
}

#[tokio::test]
async fn avatar_upload_keeps_points_verified_during_upload() {
    let store = Arc::new(MemoryStore::new());
    let blobs = Arc::new(VerifyingBlobs {
        store: store.clone(),
        referral: Mutex::new(None),
    });
    let app = App::with_state(State::new(
        Config::with_admin_token(ADMIN),
        store,
        blobs.clone(),
    ));

    let promoter = app.approved_promoter("9876543210").await;
    let course = app.course("Full Stack", "paid").await;
    let (_, referral) = app.refer(&promoter, &course).await;
    let referral: Uuid = referral["id"].as_str().unwrap().parse().unwrap();
    *blobs.referral.lock().unwrap() = Some(referral);

    let (status, user) = app.upload(&promoter, "image/png", noisy_png(32, 32)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(blobs.referral.lock().unwrap().is_none());
    assert_eq!(user["total_points"], 10);
    assert_eq!(user["paid_referrals"], 1);
    assert!(user["avatar_url"].as_str().unwrap().starts_with("https://cdn.example.com/"));

    let (_, profile) = app.get(&format!("/users/{promoter}")).await;
    assert_eq!(profile["total_points"], 10);
    assert_eq!(profile["current_level"], "Bronze");
}

#[tokio::test]
async fn profile_and_admin_edits_keep_verified_points() {
    let app = App::new();
    let promoter = app.approved_promoter("9876543210").await;
    let course = app.course("Full Stack", "paid").await;
    let (_, referral) = app.refer(&promoter, &course).await;
    let referral = referral["id"].as_str().unwrap();

    app.admin("PATCH", &format!("/admin/users/{promoter}"), Some(json!({ "total_points": 95 })))
        .await;
    app.admin("POST", &format!("/admin/referrals/{referral}/verify"), None)
        .await;

    let (status, user) = app
        .json("PATCH", &format!("/users/{promoter}"), json!({ "full_name": "Asha M" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["full_name"], "Asha M");
    assert_eq!(user["total_points"], 105);

    let (_, user) = app
        .admin("PATCH", &format!("/admin/users/{promoter}"), Some(json!({ "dob": "1991-04-10" })))
        .await;
    assert_eq!(user["total_points"], 105);
    assert_eq!(user["current_level"], "Silver");
    assert_eq!(user["paid_referrals"], 1);
}

#[tokio::test]
async fn approval_assigns_member_number() {
    let app = App::new();
    let first = app.register("9876543210").await;
    let second = app.register("9123456789").await;

    let (_, pending) = app
        .json("POST", "/users/lookup", json!({ "whatsapp_number": "9876543210" }))
        .await;
    assert_eq!(pending["user"]["custom_id"], Value::Null);

    let (_, approved) = app
        .admin("POST", &format!("/admin/users/{second}/approve"), None)
        .await;
    assert_eq!(approved["custom_id"], "CW00001");
    let (_, approved) = app
        .admin("POST", &format!("/admin/users/{first}/approve"), None)
        .await;
    assert_eq!(approved["custom_id"], "CW00002");

    let (_, again) = app
        .admin("POST", &format!("/admin/users/{first}/approve"), None)
        .await;
    assert_eq!(again["custom_id"], "CW00002");

    let (_, card) = app.get(&format!("/users/{first}")).await;
    assert_eq!(card["custom_id"], "CW00002");
    assert_eq!(card["aadhar_display"], "1234 5678 9012");
    assert_eq!(card["aadhar_number"], "123456789012");
}

#[tokio::test]
async fn admin_search_filters_users_and_referrals() {
    let app = App::new();
    let asha = app.approved_promoter("9876543210").await;
    app.register("9123456789").await;
    let course = app.course("Tally", "free").await;
    app.refer(&asha, &course).await;

    let ids = |users: &Value| -> Vec<String> {
        users
            .as_array()
            .unwrap()
            .iter()
            .map(|user| user["whatsapp_number"].as_str().unwrap().to_string())
            .collect()
    };

    let (_, all) = app.admin("GET", "/admin/users", None).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, found) = app.admin("GET", "/admin/users?q=98765", None).await;
    assert_eq!(ids(&found), ["9876543210"]);

    let (_, found) = app.admin("GET", "/admin/users?q=cw00001", None).await;
    assert_eq!(ids(&found), ["9876543210"]);

    let (_, found) = app.admin("GET", "/admin/users?q=ASHA%20MEN", None).await;
    assert_eq!(found.as_array().unwrap().len(), 2);

    let (_, found) = app.admin("GET", "/admin/users?q=%20%20", None).await;
    assert_eq!(found.as_array().unwrap().len(), 2);

    let (_, found) = app.admin("GET", "/admin/users/pending?q=98765", None).await;
    assert!(found.as_array().unwrap().is_empty());
    let (_, found) = app.admin("GET", "/admin/users/pending?q=91234", None).await;
    assert_eq!(ids(&found), ["9123456789"]);

    let (_, found) = app.admin("GET", "/admin/referrals/pending?q=ravi", None).await;
    assert_eq!(found.as_array().unwrap().len(), 1);
    let (_, found) = app.admin("GET", "/admin/referrals/pending?q=ashamenon", None).await;
    assert_eq!(found.as_array().unwrap().len(), 1);
    let (_, found) = app
        .admin("GET", "/admin/referrals/pending?q=2109%208765", None)
        .await;
    assert_eq!(found.as_array().unwrap().len(), 1);
    let (_, found) = app.admin("GET", "/admin/referrals/pending?q=priya", None).await;
    assert!(found.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn registration_rejects_non_ascii_digits() {
    let app = App::new();

    let (status, _) = app
        .json(
            "POST",
            "/users",
            json!({
                "full_name": "Asha Menon",
                "whatsapp_number": "९८७६५४३२१०",
                "aadhar_number": "123456789012",
                "dob": "1991-04-09",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(
            "POST",
            "/users",
            json!({
                "full_name": "Asha Menon",
                "whatsapp_number": "9876543210",
                "aadhar_number": "١٢٣٤٥٦٧٨٩٠١٢",
                "dob": "1991-04-09",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_store() {
    let app = App::new();
    app.register("9876543210").await;

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn health_requires_cron_secret_when_configured() {
    let mut config = Config::with_admin_token(ADMIN);
    config.cron_secret = Some("cron".to_string());
    let app = router(State::in_memory(config));

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::get("/health")
                .header(header::AUTHORIZATION, "Bearer cron")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
