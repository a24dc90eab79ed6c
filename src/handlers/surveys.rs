// Survey endpoints. Create and update delegate to the transactional workflow in
// `SurveyService`; everything here is request parsing and envelopes.

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};

use crate::app::AppState;
use crate::database::models::{Survey, SurveyDetail, SurveyImage};
use crate::handlers::form::FormParts;
use crate::handlers::ListParams;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::{CreatedSurvey, NewSurvey, SurveyForm, SurveyUpdate, UpdatedSurvey};

const IMAGE_FIELD: &str = "images";
const KEEP_FIELD: &str = "keepImageIds";

fn survey_form(parts: &FormParts) -> SurveyForm {
    SurveyForm {
        title: parts.text("title"),
        project: parts.text("project"),
        description: parts.text("description"),
        survey_date: parts.text("surveyDate"),
    }
}

/// GET /surveys
pub async fn list(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Vec<Survey>> {
    let Query(params) = params?;
    let surveys = state.surveys.list_surveys(params.limit, params.offset).await?;
    Ok(ApiResponse::success(surveys).message("Surveys retrieved"))
}

/// POST /surveys
pub async fn create(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<CreatedSurvey> {
    let parts = FormParts::collect(multipart?, IMAGE_FIELD, state.surveys.max_attachments()).await?;
    let fields = survey_form(&parts).validate()?;

    let created = state
        .surveys
        .create_survey(NewSurvey {
            fields,
            attachments: parts.into_files(),
        })
        .await?;

    Ok(ApiResponse::success(created).message("Survey saved"))
}

/// GET /surveys/:id
pub async fn show(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<SurveyDetail> {
    let Path(id) = id?;
    let detail = state.surveys.get_survey(id).await?;
    Ok(ApiResponse::success(detail).message("Survey retrieved"))
}

/// PUT /surveys/:id
pub async fn update(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<UpdatedSurvey> {
    let Path(survey_id) = id?;
    let parts = FormParts::collect(multipart?, IMAGE_FIELD, state.surveys.max_attachments()).await?;
    let fields = survey_form(&parts).validate()?;
    let keep_image_ids = parts.image_ids(KEEP_FIELD)?;

    let updated = state
        .surveys
        .update_survey(SurveyUpdate {
            survey_id,
            fields,
            keep_image_ids,
            attachments: parts.into_files(),
        })
        .await?;

    Ok(ApiResponse::success(updated).message("Survey updated"))
}

/// DELETE /surveys/:id
pub async fn delete(State(state): State<AppState>, id: Result<Path<i64>, PathRejection>) -> ApiResult<()> {
    let Path(id) = id?;
    state.surveys.delete_survey(id).await?;
    Ok(ApiResponse::success(()).message("Survey deleted"))
}

/// GET /surveys/:id/images
pub async fn images(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Vec<SurveyImage>> {
    let Path(id) = id?;
    let images = state.surveys.list_images(id).await?;
    Ok(ApiResponse::success(images).message("Survey images retrieved"))
}
