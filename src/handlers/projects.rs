// handlers/projects.rs - client projects

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::json;

use crate::app::AppState;
use crate::database::models::{NewProject, Project};
use crate::database::Repository;
use crate::filter::FilterData;
use crate::handlers::ListParams;
use crate::middleware::{ApiResponse, ApiResult};

/// GET /projects
pub async fn list(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Vec<Project>> {
    let Query(params) = params?;
    let rows = Repository::<Project>::new(state.pool.clone())
        .select_any(FilterData {
            order: Some(json!("id desc")),
            limit: params.limit,
            offset: params.offset,
            ..Default::default()
        })
        .await?;
    Ok(ApiResponse::success(rows).message("Projects retrieved"))
}

/// POST /projects
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<NewProject>, JsonRejection>,
) -> ApiResult<Project> {
    let Json(body) = body?;
    let row = body.insert(&state.pool).await?;
    tracing::info!(id = row.id, "project created");
    Ok(ApiResponse::created(row).message("Project created"))
}

/// GET /projects/:id
pub async fn show(State(state): State<AppState>, id: Result<Path<i64>, PathRejection>) -> ApiResult<Project> {
    let Path(id) = id?;
    let row = Repository::<Project>::new(state.pool.clone()).select_id(id).await?;
    Ok(ApiResponse::success(row).message("Project retrieved"))
}

/// DELETE /projects/:id
pub async fn delete(State(state): State<AppState>, id: Result<Path<i64>, PathRejection>) -> ApiResult<()> {
    let Path(id) = id?;
    Repository::<Project>::new(state.pool.clone()).soft_delete(id).await?;
    Ok(ApiResponse::success(()).message("Project deleted"))
}
