// handlers/users.rs - user administration

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::database::models::User;
use crate::handlers::form::FormParts;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::{AccountChanges, NewAccount, UserQuery};

const IMAGE_FIELD: &str = "image";

#[derive(Debug, Default, Deserialize)]
pub struct UserListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub password: Option<String>,
}

/// GET /users?limit=&offset=&search=&user_id=
pub async fn list(
    State(state): State<AppState>,
    params: Result<Query<UserListParams>, QueryRejection>,
) -> ApiResult<Vec<User>> {
    let Query(params) = params?;
    let users = state
        .users
        .list(UserQuery {
            limit: params.limit,
            offset: params.offset,
            search: params.search,
            user_id: params.user_id,
        })
        .await?;
    Ok(ApiResponse::success(users).message("Users retrieved"))
}

/// POST /users - multipart, optional profile image under `image`
pub async fn create(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<User> {
    let parts = FormParts::collect(multipart?, IMAGE_FIELD, 1).await?;
    let account = NewAccount {
        name: parts.text("name"),
        email: parts.text("email"),
        password: parts.text("password"),
        role: parts.text("role"),
        phone: parts.text("phone"),
    };
    let user = state.users.create(account, parts.into_files().into_iter().next()).await?;
    Ok(ApiResponse::created(user).message("User created"))
}

/// GET /users/:id
pub async fn show(State(state): State<AppState>, id: Result<Path<i64>, PathRejection>) -> ApiResult<User> {
    let Path(id) = id?;
    let user = state.users.get(id).await?;
    Ok(ApiResponse::success(user).message("User retrieved"))
}

/// PUT /users/:id - multipart; the stored image only changes when a new one is sent
pub async fn update(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<User> {
    let Path(id) = id?;
    let parts = FormParts::collect(multipart?, IMAGE_FIELD, 1).await?;
    let changes = AccountChanges {
        name: parts.text("name"),
        email: parts.text("email"),
        role: parts.text("role"),
        phone: parts.text("phone"),
    };
    let user = state.users.update(id, changes, parts.into_files().into_iter().next()).await?;
    Ok(ApiResponse::success(user).message("User updated"))
}

/// DELETE /users/:id
pub async fn delete(State(state): State<AppState>, id: Result<Path<i64>, PathRejection>) -> ApiResult<()> {
    let Path(id) = id?;
    state.users.delete(id).await?;
    Ok(ApiResponse::success(()).message("User deleted"))
}

/// PUT /users/:id/password
pub async fn change_password(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<PasswordRequest>, JsonRejection>,
) -> ApiResult<()> {
    let Path(id) = id?;
    let Json(body) = body?;
    state.users.change_password(id, body.password).await?;
    Ok(ApiResponse::success(()).message("Password changed"))
}
