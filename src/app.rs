use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post, put};
use axum::Router;
use serde_json::json;
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::config;
use crate::database::{DatabaseManager, PgSurveyGateway};
use crate::handlers::{auth, projects, surveys, technician_teams, tickets, users};
use crate::services::{SurveyService, UserService};
use crate::uploads::FileIntake;

/// Shared, immutable per-process state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub surveys: Arc<SurveyService>,
    pub users: Arc<UserService>,
    pub upload_dir: PathBuf,
}

impl AppState {
    pub fn new(pool: PgPool, intake: Arc<dyn FileIntake>, upload_dir: impl Into<PathBuf>) -> Self {
        let gateway = Arc::new(PgSurveyGateway::new(pool.clone()));
        Self {
            surveys: Arc::new(SurveyService::new(gateway, intake.clone())),
            users: Arc::new(UserService::new(pool.clone(), intake)),
            pool,
            upload_dir: upload_dir.into(),
        }
    }

    /// Survey routes backed by in-memory storage; the pool is lazy and never used
    #[cfg(test)]
    pub fn for_surveys(
        gateway: Arc<crate::testing::MemoryGateway>,
        intake: Arc<crate::testing::ScriptedIntake>,
    ) -> Self {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://fieldops@localhost/fieldops_test")
            .expect("lazy pool");
        Self {
            surveys: Arc::new(SurveyService::new(gateway, intake.clone()).with_limits(10, 4)),
            users: Arc::new(UserService::new(pool.clone(), intake)),
            pool,
            upload_dir: std::env::temp_dir(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = &config().api;
    let uploads = ServeDir::new(&state.upload_dir);

    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        .merge(auth_routes())
        .merge(user_routes())
        .merge(survey_routes())
        .merge(resource_routes())
        .nest_service(&config().storage.public_prefix, uploads)
        .with_state(state)
        // Global middleware
        .layer(DefaultBodyLimit::max(api.max_request_size_bytes))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(users::list).post(users::create))
        .route("/users/:id", get(users::show).put(users::update).delete(users::delete))
        .route("/users/:id/password", put(users::change_password))
}

fn survey_routes() -> Router<AppState> {
    Router::new()
        .route("/surveys", get(surveys::list).post(surveys::create))
        .route(
            "/surveys/:id",
            get(surveys::show).put(surveys::update).delete(surveys::delete),
        )
        .route("/surveys/:id/images", get(surveys::images))
}

fn resource_routes() -> Router<AppState> {
    Router::new()
        .route("/tickets", get(tickets::list).post(tickets::create))
        .route("/tickets/:id", get(tickets::show).delete(tickets::delete))
        .route(
            "/technician-teams",
            get(technician_teams::list).post(technician_teams::create),
        )
        .route(
            "/technician-teams/:id",
            get(technician_teams::show).delete(technician_teams::delete),
        )
        .route("/projects", get(projects::list).post(projects::create))
        .route("/projects/:id", get(projects::show).delete(projects::delete))
}

fn cors_layer() -> CorsLayer {
    let security = &config().security;
    if !security.enable_cors {
        return CorsLayer::new();
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() && !crate::is_production!() {
        CorsLayer::permissive()
    } else {
        CorsLayer::permissive().allow_origin(AllowOrigin::list(origins))
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "message": "FieldOps API",
        "data": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "endpoints": {
                "auth": "/auth/register, /auth/login",
                "users": "/users[/:id[/password]]",
                "tickets": "/tickets[/:id]",
                "surveys": "/surveys[/:id[/images]]",
                "technician_teams": "/technician-teams[/:id]",
                "projects": "/projects[/:id]",
                "uploads": "/uploads/*",
            }
        }
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "ok",
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "message": "database unavailable",
                    "data": {
                        "status": "degraded",
                        "timestamp": now
                    },
                    "code": "SERVICE_UNAVAILABLE"
                })),
            )
        }
    }
}
