// handlers/auth.rs - POST /auth/register and POST /auth/login
//
// Login hands back the profile directly; there is no session or token.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::database::models::UserProfile;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::NewAccount;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// POST /auth/register - every field is required; duplicate email is 409
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<UserProfile> {
    let Json(body) = body?;
    let profile = state
        .users
        .register(NewAccount {
            name: body.name,
            email: body.email,
            password: body.password,
            role: body.role,
            phone: body.phone,
        })
        .await?;
    Ok(ApiResponse::created(profile).message("User registered"))
}

/// POST /auth/login - unknown email is 404, wrong password is 401
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<UserProfile> {
    let Json(body) = body?;
    let profile = state.users.login(body.email, body.password).await?;
    Ok(ApiResponse::success(profile).message("Login successful"))
}
