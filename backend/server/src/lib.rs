//! Documentation of the CanWin referral rewards platform.
//!
//!
//!
//! # General Flow
//! - Promoter enters their WhatsApp number, lookup says unregistered, pending or approved
//! - Unregistered promoters register and upload a photo, then wait for an admin
//! - Approved promoters refer students into courses, each referral starts pending
//! - Admin verifies the referral, the course's points are credited to the promoter
//! - Level and progress are recomputed from the new point total
//!
//!
//!
//! # Points And Levels
//! - Paid course referral: 10 points
//! - Free course referral: 2 points
//! - Levels come from [`levels::classify`], progress from [`levels::progress`]
//! - `current_level` is stored next to `total_points` for listing, but always rewritten
//!   from the total whenever points change
//!
//!
//!
//! # Collaborators
//! No module-level client. [`state::State`] is built with a [`database::Store`] and an
//! [`avatar::BlobStore`] and shared with every handler. The in-memory versions serve
//! local runs and tests.
//!
//!
//!
//! # Keep-Alive
//! A scheduled job hits `GET /health` so a free-tier database does not idle out. When
//! `CRON_SECRET` is set, the job must send it as a bearer token.
//!
//!
//!
//! # Setup
//!
//! Run locally.
//! ```sh
//! ADMIN_TOKEN=changeme RUST_LOG=info cargo run -p canwin
//! ```
//!
//! Print the tier table.
//! ```sh
//! cargo run -p tester -- --table
//! ```
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::{get, patch, post, put},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod admin;
pub mod analytics;
pub mod avatar;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

use admin::{
    all_courses_handler, approve_user_handler, create_course_handler, delete_course_handler,
    delete_user_handler, monthly_handler, pending_referrals_handler, pending_users_handler,
    require_admin, stats_handler, update_course_handler, update_user_handler, users_handler,
    verify_referral_handler,
};
use config::Config;
use routes::{
    avatar_handler, courses_handler, create_referral_handler, health_handler, levels_handler,
    lookup_handler, progress_handler, register_handler, update_profile_handler, user_handler,
    user_referrals_handler,
};
use state::State;

pub fn router(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let admin = Router::new()
        .route("/users", get(users_handler))
        .route("/users/pending", get(pending_users_handler))
        .route(
            "/users/{id}",
            patch(update_user_handler).delete(delete_user_handler),
        )
        .route("/users/{id}/approve", post(approve_user_handler))
        .route("/referrals/pending", get(pending_referrals_handler))
        .route("/referrals/{id}/verify", post(verify_referral_handler))
        .route(
            "/courses",
            get(all_courses_handler).post(create_course_handler),
        )
        .route(
            "/courses/{id}",
            put(update_course_handler).delete(delete_course_handler),
        )
        .route("/stats", get(stats_handler))
        .route("/analytics/monthly", get(monthly_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(health_handler))
        .route("/levels", get(levels_handler))
        .route("/levels/progress", get(progress_handler))
        .route("/courses", get(courses_handler))
        .route("/users", post(register_handler))
        .route("/users/lookup", post(lookup_handler))
        .route("/users/{id}", get(user_handler).patch(update_profile_handler))
        .route(
            "/users/{id}/avatar",
            post(avatar_handler).layer(DefaultBodyLimit::max(state.config.max_upload_bytes)),
        )
        .route("/users/{id}/referrals", get(user_referrals_handler))
        .route("/referrals", post(create_referral_handler))
        .nest("/admin", admin)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load().context("Environment misconfigured")?;

    info!("Initializing state...");
    let state = State::in_memory(config);
    let address = format!("0.0.0.0:{}", state.config.port);

    info!("Starting server...");
    let app = router(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
