use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::SoftDelete;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Survey {
    pub id: i64,
    pub title: String,
    pub project: String,
    pub description: String,
    pub survey_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SoftDelete for Survey {
    const TABLE: &'static str = "surveys";
}

/// Attached photo. Rows are inserted or deleted, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SurveyImage {
    pub id: i64,
    pub survey_id: i64,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

/// A survey together with its current images
#[derive(Debug, Clone, Serialize)]
pub struct SurveyDetail {
    #[serde(flatten)]
    pub survey: Survey,
    pub images: Vec<SurveyImage>,
}

/// Validated scalar fields written by the create and update workflows
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyFields {
    pub title: String,
    pub project: String,
    pub description: String,
    pub survey_date: NaiveDate,
}
