// Storage contract for the survey workflow.
//
// `SurveyGateway` hands out units of work (one database transaction each) and
// answers the plain reads. Every statement is parameterized.

use async_trait::async_trait;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::database::manager::DatabaseError;
use crate::database::models::{Survey, SurveyFields, SurveyImage};
use crate::database::repository::Repository;
use crate::filter::FilterData;

/// One atomic group of survey writes. Dropping it without `commit` discards the work.
#[async_trait]
pub trait SurveyUnitOfWork: Send {
    /// Insert a survey row and return its generated id
    async fn insert_survey(&mut self, fields: &SurveyFields) -> Result<i64, DatabaseError>;

    /// Overwrite the scalar fields of a live survey; returns affected rows
    async fn update_survey(&mut self, survey_id: i64, fields: &SurveyFields) -> Result<u64, DatabaseError>;

    async fn select_images(&mut self, survey_id: i64) -> Result<Vec<SurveyImage>, DatabaseError>;

    async fn delete_images(&mut self, survey_id: i64, image_ids: &[i64]) -> Result<u64, DatabaseError>;

    async fn insert_image(&mut self, survey_id: i64, path: &str) -> Result<SurveyImage, DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait SurveyGateway: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn SurveyUnitOfWork>, DatabaseError>;

    /// Live surveys, newest first
    async fn list_surveys(&self, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Survey>, DatabaseError>;

    /// A live survey; soft-deleted rows are reported as absent
    async fn find_survey(&self, survey_id: i64) -> Result<Option<Survey>, DatabaseError>;

    async fn list_images(&self, survey_id: i64) -> Result<Vec<SurveyImage>, DatabaseError>;

    /// Stamp the survey deleted and drop its image rows in one transaction
    async fn soft_delete_survey(&self, survey_id: i64) -> Result<(), DatabaseError>;
}

pub struct PgSurveyGateway {
    surveys: Repository<Survey>,
}

impl PgSurveyGateway {
    pub fn new(pool: PgPool) -> Self {
        Self {
            surveys: Repository::new(pool),
        }
    }
}

const IMAGE_COLUMNS: &str = "id, survey_id, path, created_at";

#[async_trait]
impl SurveyGateway for PgSurveyGateway {
    async fn begin(&self) -> Result<Box<dyn SurveyUnitOfWork>, DatabaseError> {
        let tx = self.surveys.pool().begin().await?;
        Ok(Box::new(PgSurveyUnitOfWork { tx }))
    }

    async fn list_surveys(&self, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Survey>, DatabaseError> {
        self.surveys
            .select_any(FilterData {
                order: Some(json!("id desc")),
                limit,
                offset,
                ..Default::default()
            })
            .await
    }

    async fn find_survey(&self, survey_id: i64) -> Result<Option<Survey>, DatabaseError> {
        self.surveys
            .select_one(FilterData {
                where_clause: Some(json!({ "id": survey_id })),
                ..Default::default()
            })
            .await
    }

    async fn list_images(&self, survey_id: i64) -> Result<Vec<SurveyImage>, DatabaseError> {
        let sql = format!("SELECT {} FROM survey_images WHERE survey_id = $1 ORDER BY id", IMAGE_COLUMNS);
        let images = sqlx::query_as::<_, SurveyImage>(&sql)
            .bind(survey_id)
            .fetch_all(self.surveys.pool())
            .await?;
        Ok(images)
    }

    async fn soft_delete_survey(&self, survey_id: i64) -> Result<(), DatabaseError> {
        let mut tx = self.surveys.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE surveys SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(survey_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("surveys {} not found", survey_id)));
        }

        sqlx::query("DELETE FROM survey_images WHERE survey_id = $1")
            .bind(survey_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

struct PgSurveyUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SurveyUnitOfWork for PgSurveyUnitOfWork {
    async fn insert_survey(&mut self, fields: &SurveyFields) -> Result<i64, DatabaseError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO surveys (title, project, description, survey_date) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&fields.title)
        .bind(&fields.project)
        .bind(&fields.description)
        .bind(fields.survey_date)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn update_survey(&mut self, survey_id: i64, fields: &SurveyFields) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE surveys SET title = $1, project = $2, description = $3, survey_date = $4, updated_at = NOW()
             WHERE id = $5 AND deleted_at IS NULL",
        )
        .bind(&fields.title)
        .bind(&fields.project)
        .bind(&fields.description)
        .bind(fields.survey_date)
        .bind(survey_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn select_images(&mut self, survey_id: i64) -> Result<Vec<SurveyImage>, DatabaseError> {
        let sql = format!("SELECT {} FROM survey_images WHERE survey_id = $1 ORDER BY id", IMAGE_COLUMNS);
        let images = sqlx::query_as::<_, SurveyImage>(&sql)
            .bind(survey_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(images)
    }

    async fn delete_images(&mut self, survey_id: i64, image_ids: &[i64]) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM survey_images WHERE survey_id = $1 AND id = ANY($2)")
            .bind(survey_id)
            .bind(image_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_image(&mut self, survey_id: i64, path: &str) -> Result<SurveyImage, DatabaseError> {
        let sql = format!(
            "INSERT INTO survey_images (survey_id, path) VALUES ($1, $2) RETURNING {}",
            IMAGE_COLUMNS
        );
        let image = sqlx::query_as::<_, SurveyImage>(&sql)
            .bind(survey_id)
            .bind(path)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(image)
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
