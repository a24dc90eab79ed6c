// handlers/tickets.rs - support tickets

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;
use crate::database::models::{NewTicket, Ticket};
use crate::database::Repository;
use crate::filter::FilterData;
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Default, Deserialize)]
pub struct TicketListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status: Option<String>,
}

/// GET /tickets?status=
pub async fn list(
    State(state): State<AppState>,
    params: Result<Query<TicketListParams>, QueryRejection>,
) -> ApiResult<Vec<Ticket>> {
    let Query(params) = params?;
    let where_clause = params
        .status
        .filter(|status| !status.trim().is_empty())
        .map(|status| json!({ "status": status.trim() }));

    let rows = Repository::<Ticket>::new(state.pool.clone())
        .select_any(FilterData {
            where_clause,
            order: Some(json!("id desc")),
            limit: params.limit,
            offset: params.offset,
            ..Default::default()
        })
        .await?;
    Ok(ApiResponse::success(rows).message("Tickets retrieved"))
}

/// POST /tickets
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<NewTicket>, JsonRejection>,
) -> ApiResult<Ticket> {
    let Json(body) = body?;
    let row = body.insert(&state.pool).await?;
    tracing::info!(id = row.id, "ticket created");
    Ok(ApiResponse::created(row).message("Ticket created"))
}

/// GET /tickets/:id
pub async fn show(State(state): State<AppState>, id: Result<Path<i64>, PathRejection>) -> ApiResult<Ticket> {
    let Path(id) = id?;
    let row = Repository::<Ticket>::new(state.pool.clone()).select_id(id).await?;
    Ok(ApiResponse::success(row).message("Ticket retrieved"))
}

/// DELETE /tickets/:id
pub async fn delete(State(state): State<AppState>, id: Result<Path<i64>, PathRejection>) -> ApiResult<()> {
    let Path(id) = id?;
    Repository::<Ticket>::new(state.pool.clone()).soft_delete(id).await?;
    Ok(ApiResponse::success(()).message("Ticket deleted"))
}
