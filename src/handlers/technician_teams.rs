// handlers/technician_teams.rs - field technician teams

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::json;

use crate::app::AppState;
use crate::database::models::{NewTechnicianTeam, TechnicianTeam};
use crate::database::Repository;
use crate::filter::FilterData;
use crate::handlers::ListParams;
use crate::middleware::{ApiResponse, ApiResult};

/// GET /technician-teams
pub async fn list(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Vec<TechnicianTeam>> {
    let Query(params) = params?;
    let rows = Repository::<TechnicianTeam>::new(state.pool.clone())
        .select_any(FilterData {
            order: Some(json!("id desc")),
            limit: params.limit,
            offset: params.offset,
            ..Default::default()
        })
        .await?;
    Ok(ApiResponse::success(rows).message("Technician teams retrieved"))
}

/// POST /technician-teams
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<NewTechnicianTeam>, JsonRejection>,
) -> ApiResult<TechnicianTeam> {
    let Json(body) = body?;
    let row = body.insert(&state.pool).await?;
    tracing::info!(id = row.id, "technician team created");
    Ok(ApiResponse::created(row).message("Technician team created"))
}

/// GET /technician-teams/:id
pub async fn show(State(state): State<AppState>, id: Result<Path<i64>, PathRejection>) -> ApiResult<TechnicianTeam> {
    let Path(id) = id?;
    let row = Repository::<TechnicianTeam>::new(state.pool.clone()).select_id(id).await?;
    Ok(ApiResponse::success(row).message("Technician team retrieved"))
}

/// DELETE /technician-teams/:id
pub async fn delete(State(state): State<AppState>, id: Result<Path<i64>, PathRejection>) -> ApiResult<()> {
    let Path(id) = id?;
    Repository::<TechnicianTeam>::new(state.pool.clone()).soft_delete(id).await?;
    Ok(ApiResponse::success(()).message("Technician team deleted"))
}
