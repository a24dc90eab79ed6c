// Survey workflow engine.
//
// Create and update run as one unit of work each:
//   Started -> ParentWritten -> ImagesReconciled -> Committed
// Any failure before Committed rolls the whole unit back.

use chrono::{DateTime, NaiveDate};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::config;
use crate::database::gateway::{SurveyGateway, SurveyUnitOfWork};
use crate::database::manager::DatabaseError;
use crate::database::models::{Survey, SurveyDetail, SurveyFields, SurveyImage};
use crate::uploads::{Attachment, FileIntake, IntakeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStage {
    Started,
    ParentWritten,
    ImagesReconciled,
    Committed,
    RolledBack,
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowStage::Started => "started",
            WorkflowStage::ParentWritten => "parent_written",
            WorkflowStage::ImagesReconciled => "images_reconciled",
            WorkflowStage::Committed => "committed",
            WorkflowStage::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("too many attachments: {count} (max {max})")]
    TooManyAttachments { count: usize, max: usize },

    #[error("survey {0} not found")]
    SurveyNotFound(i64),

    #[error("could not start transaction: {0}")]
    Begin(#[source] DatabaseError),

    #[error("survey insert failed: {0}")]
    InsertSurvey(#[source] DatabaseError),

    #[error("survey update failed: {0}")]
    UpdateSurvey(#[source] DatabaseError),

    #[error("reading existing images failed: {0}")]
    ReadImages(#[source] DatabaseError),

    #[error("deleting images failed: {0}")]
    DeleteImages(#[source] DatabaseError),

    #[error("storing attachment {file_name} failed: {source}")]
    PersistAttachment {
        file_name: String,
        #[source]
        source: IntakeError,
    },

    #[error("image insert for {file_name} failed: {source}")]
    InsertImage {
        file_name: String,
        #[source]
        source: DatabaseError,
    },

    #[error("commit failed: {0}")]
    Commit(#[source] DatabaseError),
}

/// Canonical form of an image identity.
///
/// Clients send ids as JSON numbers, strings, or padded strings; all of them
/// collapse to the decimal form of the integer so `"03"`, `" 3"` and `3` are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(String);

impl ImageId {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<i64>() {
            Ok(n) => Some(Self(n.to_string())),
            Err(_) => Some(Self(trimmed.to_string())),
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::from).or_else(|| Self::parse(&n.to_string())),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for ImageId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Raw scalar form fields as they arrive from the client
#[derive(Debug, Clone, Default)]
pub struct SurveyForm {
    pub title: Option<String>,
    pub project: Option<String>,
    pub description: Option<String>,
    pub survey_date: Option<String>,
}

impl SurveyForm {
    /// Check required fields and parse the date. Runs before any storage call.
    pub fn validate(self) -> Result<SurveyFields, WorkflowError> {
        let title = required(self.title, "title")?;
        let project = required(self.project, "project")?;
        let raw_date = required(self.survey_date, "surveyDate")?;
        let survey_date = parse_survey_date(&raw_date).ok_or_else(|| WorkflowError::Validation {
            field: "surveyDate",
            message: format!("expected YYYY-MM-DD, got {}", raw_date),
        })?;

        Ok(SurveyFields {
            title,
            project,
            description: self.description.map(|d| d.trim().to_string()).unwrap_or_default(),
            survey_date,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, WorkflowError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(WorkflowError::Validation {
            field,
            message: "This field is required".to_string(),
        }),
    }
}

fn parse_survey_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

#[derive(Debug, Clone)]
pub struct NewSurvey {
    pub fields: SurveyFields,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone)]
pub struct SurveyUpdate {
    pub survey_id: i64,
    pub fields: SurveyFields,
    /// Existing images to retain. Empty means retain none.
    pub keep_image_ids: Vec<ImageId>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSurvey {
    pub insert_id: i64,
    pub images: Vec<SurveyImage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedSurvey {
    pub survey_id: i64,
    pub affected_rows: u64,
    pub removed_image_ids: Vec<i64>,
    pub added_images: Vec<SurveyImage>,
    /// Image set after the update: retained plus added
    pub images: Vec<SurveyImage>,
}

pub struct SurveyService {
    gateway: Arc<dyn SurveyGateway>,
    intake: Arc<dyn FileIntake>,
    max_attachments: usize,
    concurrency: usize,
}

impl SurveyService {
    pub fn new(gateway: Arc<dyn SurveyGateway>, intake: Arc<dyn FileIntake>) -> Self {
        let api = &config().api;
        Self {
            gateway,
            intake,
            max_attachments: api.max_upload_files,
            concurrency: api.attachment_concurrency.max(1),
        }
    }

    pub fn with_limits(mut self, max_attachments: usize, concurrency: usize) -> Self {
        self.max_attachments = max_attachments;
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn max_attachments(&self) -> usize {
        self.max_attachments
    }

    pub async fn create_survey(&self, request: NewSurvey) -> Result<CreatedSurvey, WorkflowError> {
        self.check_attachment_count(request.attachments.len())?;

        let mut uow = self.gateway.begin().await.map_err(WorkflowError::Begin)?;
        let mut stage = WorkflowStage::Started;

        let outcome = self.run_create(uow.as_mut(), &request, &mut stage).await;
        match outcome {
            Ok(created) => {
                uow.commit().await.map_err(WorkflowError::Commit)?;
                info!(
                    survey_id = created.insert_id,
                    images = created.images.len(),
                    stage = %WorkflowStage::Committed,
                    "survey created"
                );
                Ok(created)
            }
            Err(err) => {
                Self::abort(uow, stage, &err).await;
                Err(err)
            }
        }
    }

    pub async fn update_survey(&self, request: SurveyUpdate) -> Result<UpdatedSurvey, WorkflowError> {
        self.check_attachment_count(request.attachments.len())?;

        let mut uow = self.gateway.begin().await.map_err(WorkflowError::Begin)?;
        let mut stage = WorkflowStage::Started;

        let outcome = self.run_update(uow.as_mut(), &request, &mut stage).await;
        match outcome {
            Ok(updated) => {
                uow.commit().await.map_err(WorkflowError::Commit)?;
                info!(
                    survey_id = updated.survey_id,
                    removed = updated.removed_image_ids.len(),
                    added = updated.added_images.len(),
                    stage = %WorkflowStage::Committed,
                    "survey updated"
                );
                Ok(updated)
            }
            Err(err) => {
                Self::abort(uow, stage, &err).await;
                Err(err)
            }
        }
    }

    async fn run_create(
        &self,
        uow: &mut dyn SurveyUnitOfWork,
        request: &NewSurvey,
        stage: &mut WorkflowStage,
    ) -> Result<CreatedSurvey, WorkflowError> {
        let survey_id = uow
            .insert_survey(&request.fields)
            .await
            .map_err(WorkflowError::InsertSurvey)?;
        *stage = WorkflowStage::ParentWritten;

        let images = self.attach(uow, survey_id, &request.attachments).await?;
        *stage = WorkflowStage::ImagesReconciled;

        Ok(CreatedSurvey { insert_id: survey_id, images })
    }

    async fn run_update(
        &self,
        uow: &mut dyn SurveyUnitOfWork,
        request: &SurveyUpdate,
        stage: &mut WorkflowStage,
    ) -> Result<UpdatedSurvey, WorkflowError> {
        let survey_id = request.survey_id;

        let affected_rows = uow
            .update_survey(survey_id, &request.fields)
            .await
            .map_err(WorkflowError::UpdateSurvey)?;
        if affected_rows == 0 {
            return Err(WorkflowError::SurveyNotFound(survey_id));
        }
        *stage = WorkflowStage::ParentWritten;

        let existing = uow.select_images(survey_id).await.map_err(WorkflowError::ReadImages)?;
        let (kept, removed) = partition_retained(existing, &request.keep_image_ids);

        let removed_image_ids: Vec<i64> = removed.iter().map(|image| image.id).collect();
        if !removed_image_ids.is_empty() {
            uow.delete_images(survey_id, &removed_image_ids)
                .await
                .map_err(WorkflowError::DeleteImages)?;
        }

        let added_images = self.attach(uow, survey_id, &request.attachments).await?;
        *stage = WorkflowStage::ImagesReconciled;

        let mut images = kept;
        images.extend(added_images.iter().cloned());

        Ok(UpdatedSurvey {
            survey_id,
            affected_rows,
            removed_image_ids,
            added_images,
            images,
        })
    }

    /// Persist every attachment (bounded fan-out), wait for all of them, then
    /// insert one image row per stored file on the unit of work's connection.
    async fn attach(
        &self,
        uow: &mut dyn SurveyUnitOfWork,
        survey_id: i64,
        attachments: &[Attachment],
    ) -> Result<Vec<SurveyImage>, WorkflowError> {
        if attachments.is_empty() {
            return Ok(Vec::new());
        }

        let intake = Arc::clone(&self.intake);
        let mut outcomes: Vec<(usize, Result<String, IntakeError>)> = stream::iter(attachments.iter().cloned().enumerate())
            .map(move |(index, attachment)| {
                let intake = Arc::clone(&intake);
                async move { (index, intake.persist(&attachment).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        // Join barrier: every persist has finished, successfully or not
        outcomes.sort_by_key(|(index, _)| *index);
        let mut stored: Vec<Option<String>> = vec![None; attachments.len()];
        let mut first_failure = None;
        for (index, outcome) in outcomes {
            match outcome {
                Ok(path) => stored[index] = Some(path),
                Err(source) => {
                    if first_failure.is_none() {
                        first_failure = Some(WorkflowError::PersistAttachment {
                            file_name: attachments[index].file_name.clone(),
                            source,
                        });
                    }
                }
            }
        }
        if let Some(err) = first_failure {
            return Err(err);
        }

        let mut images = Vec::with_capacity(attachments.len());
        for (attachment, path) in attachments.iter().zip(stored.into_iter().flatten()) {
            let image = uow
                .insert_image(survey_id, &path)
                .await
                .map_err(|source| WorkflowError::InsertImage {
                    file_name: attachment.file_name.clone(),
                    source,
                })?;
            images.push(image);
        }
        Ok(images)
    }

    async fn abort(uow: Box<dyn SurveyUnitOfWork>, stage: WorkflowStage, err: &WorkflowError) {
        if let Err(rollback_err) = uow.rollback().await {
            tracing::error!(error = %rollback_err, "survey rollback failed");
        }
        warn!(
            failed_at = %stage,
            stage = %WorkflowStage::RolledBack,
            error = %err,
            "survey workflow rolled back"
        );
    }

    fn check_attachment_count(&self, count: usize) -> Result<(), WorkflowError> {
        if count > self.max_attachments {
            return Err(WorkflowError::TooManyAttachments {
                count,
                max: self.max_attachments,
            });
        }
        Ok(())
    }

    pub async fn list_surveys(&self, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Survey>, DatabaseError> {
        self.gateway.list_surveys(limit, offset).await
    }

    pub async fn get_survey(&self, survey_id: i64) -> Result<SurveyDetail, DatabaseError> {
        let survey = self.find_live(survey_id).await?;
        let images = self.gateway.list_images(survey_id).await?;
        Ok(SurveyDetail { survey, images })
    }

    pub async fn list_images(&self, survey_id: i64) -> Result<Vec<SurveyImage>, DatabaseError> {
        self.find_live(survey_id).await?;
        self.gateway.list_images(survey_id).await
    }

    pub async fn delete_survey(&self, survey_id: i64) -> Result<(), DatabaseError> {
        self.gateway.soft_delete_survey(survey_id).await?;
        info!(survey_id, "survey soft-deleted");
        Ok(())
    }

    async fn find_live(&self, survey_id: i64) -> Result<Survey, DatabaseError> {
        self.gateway
            .find_survey(survey_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("survey {} not found", survey_id)))
    }
}

/// Split current images into (retained, to delete) by canonical id
fn partition_retained(existing: Vec<SurveyImage>, keep: &[ImageId]) -> (Vec<SurveyImage>, Vec<SurveyImage>) {
    let keep: HashSet<&ImageId> = keep.iter().collect();
    existing
        .into_iter()
        .partition(|image| keep.contains(&ImageId::from(image.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailPoint, MemoryGateway, ScriptedIntake};
    use serde_json::json;

    fn fields(title: &str) -> SurveyFields {
        SurveyFields {
            title: title.to_string(),
            project: "P1".to_string(),
            description: "roof check".to_string(),
            survey_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
        }
    }

    fn jpg(name: &str) -> Attachment {
        Attachment::new(name, format!("bytes of {}", name).into_bytes())
    }

    fn service(gateway: &Arc<MemoryGateway>, intake: &Arc<ScriptedIntake>) -> SurveyService {
        SurveyService::new(gateway.clone(), intake.clone()).with_limits(10, 4)
    }

    fn ids(images: &[SurveyImage]) -> Vec<i64> {
        let mut ids: Vec<i64> = images.iter().map(|i| i.id).collect();
        ids.sort();
        ids
    }

    /// Survey with images 1, 2, 3 already committed
    async fn seeded(svc: &SurveyService) -> i64 {
        let created = svc
            .create_survey(NewSurvey {
                fields: fields("Site A"),
                attachments: vec![jpg("a.jpg"), jpg("b.jpg"), jpg("c.jpg")],
            })
            .await
            .unwrap();
        assert_eq!(ids(&created.images), vec![1, 2, 3]);
        created.insert_id
    }

    #[test]
    fn image_ids_compare_in_canonical_form() {
        assert_eq!(ImageId::parse("3"), Some(ImageId::from(3)));
        assert_eq!(ImageId::parse(" 03 "), Some(ImageId::from(3)));
        assert_eq!(ImageId::from_value(&json!(3)), Some(ImageId::from(3)));
        assert_eq!(ImageId::from_value(&json!("3")), Some(ImageId::from(3)));
        assert_eq!(ImageId::parse(""), None);
        assert_eq!(ImageId::from_value(&json!(null)), None);
        assert_ne!(ImageId::parse("abc"), Some(ImageId::from(3)));
    }

    #[test]
    fn form_validation_reports_missing_fields() {
        let err = SurveyForm {
            title: Some("  ".into()),
            project: Some("P1".into()),
            survey_date: Some("2024-01-10".into()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { field: "title", .. }));

        let err = SurveyForm {
            title: Some("Site A".into()),
            project: Some("P1".into()),
            survey_date: Some("10/01/2024".into()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { field: "surveyDate", .. }));

        let ok = SurveyForm {
            title: Some("Site A".into()),
            project: Some("P1".into()),
            description: None,
            survey_date: Some("2024-01-10T08:30:00Z".into()),
        }
        .validate()
        .unwrap();
        assert_eq!(ok.survey_date, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        assert_eq!(ok.description, "");
    }

    #[tokio::test]
    async fn create_with_attachments_writes_one_survey_and_n_images() {
        let gateway = Arc::new(MemoryGateway::new());
        let intake = Arc::new(ScriptedIntake::new());
        let svc = service(&gateway, &intake);

        let created = svc
            .create_survey(NewSurvey {
                fields: fields("Site A"),
                attachments: vec![jpg("img1.jpg"), jpg("img2.jpg")],
            })
            .await
            .unwrap();

        let snapshot = gateway.snapshot();
        assert_eq!(snapshot.surveys.len(), 1);
        assert_eq!(snapshot.images.len(), 2);
        assert!(snapshot.images.values().all(|i| i.survey_id == created.insert_id));

        let detail = svc.get_survey(created.insert_id).await.unwrap();
        assert_eq!(detail.survey.title, "Site A");
        assert_eq!(detail.images.len(), 2);
        assert_ne!(detail.images[0].path, detail.images[1].path);
    }

    #[tokio::test]
    async fn create_without_attachments_commits_survey_only() {
        let gateway = Arc::new(MemoryGateway::new());
        let intake = Arc::new(ScriptedIntake::new());
        let svc = service(&gateway, &intake);

        let created = svc
            .create_survey(NewSurvey { fields: fields("Bare"), attachments: vec![] })
            .await
            .unwrap();

        assert!(created.images.is_empty());
        assert_eq!(gateway.snapshot().surveys.len(), 1);
        assert_eq!(gateway.commits(), 1);
    }

    #[tokio::test]
    async fn failed_persist_of_last_attachment_rolls_back_everything() {
        let gateway = Arc::new(MemoryGateway::new());
        let intake = Arc::new(ScriptedIntake::new().fail_on("img3.jpg"));
        let svc = service(&gateway, &intake);

        let err = svc
            .create_survey(NewSurvey {
                fields: fields("Site A"),
                attachments: vec![jpg("img1.jpg"), jpg("img2.jpg"), jpg("img3.jpg")],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::PersistAttachment { ref file_name, .. } if file_name == "img3.jpg"));
        let snapshot = gateway.snapshot();
        assert!(snapshot.surveys.is_empty());
        assert!(snapshot.images.is_empty());
        assert_eq!(gateway.rollbacks(), 1);
        // Files that were stored before the failure stay behind
        assert_eq!(intake.stored_count(), 2);
    }

    #[tokio::test]
    async fn failed_insert_of_last_image_rolls_back_everything() {
        let gateway = Arc::new(MemoryGateway::new().fail_at(FailPoint::InsertImage { nth: 3 }));
        let intake = Arc::new(ScriptedIntake::new());
        let svc = service(&gateway, &intake);

        let err = svc
            .create_survey(NewSurvey {
                fields: fields("Site A"),
                attachments: vec![jpg("img1.jpg"), jpg("img2.jpg"), jpg("img3.jpg")],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::InsertImage { ref file_name, .. } if file_name == "img3.jpg"));
        let snapshot = gateway.snapshot();
        assert!(snapshot.surveys.is_empty());
        assert!(snapshot.images.is_empty());
        assert_eq!(gateway.commits(), 0);
    }

    #[tokio::test]
    async fn parent_insert_and_begin_failures_leave_nothing() {
        let gateway = Arc::new(MemoryGateway::new().fail_at(FailPoint::InsertSurvey));
        let intake = Arc::new(ScriptedIntake::new());
        let svc = service(&gateway, &intake);
        let err = svc
            .create_survey(NewSurvey { fields: fields("X"), attachments: vec![jpg("a.jpg")] })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InsertSurvey(_)));
        assert_eq!(intake.stored_count(), 0);

        let gateway = Arc::new(MemoryGateway::new().fail_at(FailPoint::Begin));
        let svc = service(&gateway, &intake);
        let err = svc
            .create_survey(NewSurvey { fields: fields("X"), attachments: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Begin(_)));
        assert!(gateway.snapshot().surveys.is_empty());
    }

    #[tokio::test]
    async fn too_many_attachments_is_rejected_before_storage() {
        let gateway = Arc::new(MemoryGateway::new());
        let intake = Arc::new(ScriptedIntake::new());
        let svc = SurveyService::new(gateway.clone(), intake.clone()).with_limits(2, 2);

        let err = svc
            .create_survey(NewSurvey {
                fields: fields("X"),
                attachments: vec![jpg("1.jpg"), jpg("2.jpg"), jpg("3.jpg")],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::TooManyAttachments { count: 3, max: 2 }));
        assert_eq!(gateway.begins(), 0);
        assert_eq!(intake.stored_count(), 0);
    }

    #[tokio::test]
    async fn update_keeps_listed_images_and_adds_new_ones() {
        let gateway = Arc::new(MemoryGateway::new());
        let intake = Arc::new(ScriptedIntake::new());
        let svc = service(&gateway, &intake);
        let survey_id = seeded(&svc).await;

        let updated = svc
            .update_survey(SurveyUpdate {
                survey_id,
                fields: fields("Site A (revised)"),
                keep_image_ids: vec![ImageId::from(1), ImageId::parse("3").unwrap()],
                attachments: vec![jpg("new.jpg")],
            })
            .await
            .unwrap();

        assert_eq!(updated.removed_image_ids, vec![2]);
        assert_eq!(updated.added_images.len(), 1);
        let new_id = updated.added_images[0].id;
        assert_eq!(ids(&updated.images), vec![1, 3, new_id]);

        let stored = svc.list_images(survey_id).await.unwrap();
        assert_eq!(ids(&stored), vec![1, 3, new_id]);
        assert_eq!(svc.get_survey(survey_id).await.unwrap().survey.title, "Site A (revised)");
    }

    #[tokio::test]
    async fn update_without_keep_list_deletes_every_existing_image() {
        let gateway = Arc::new(MemoryGateway::new());
        let intake = Arc::new(ScriptedIntake::new());
        let svc = service(&gateway, &intake);
        let created = svc
            .create_survey(NewSurvey {
                fields: fields("Site B"),
                attachments: vec![jpg("1.jpg"), jpg("2.jpg")],
            })
            .await
            .unwrap();

        let updated = svc
            .update_survey(SurveyUpdate {
                survey_id: created.insert_id,
                fields: fields("Site B"),
                keep_image_ids: vec![],
                attachments: vec![],
            })
            .await
            .unwrap();

        assert_eq!(updated.removed_image_ids, vec![1, 2]);
        assert!(updated.images.is_empty());
        assert!(svc.list_images(created.insert_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeating_an_update_with_same_keep_list_is_stable() {
        let gateway = Arc::new(MemoryGateway::new());
        let intake = Arc::new(ScriptedIntake::new());
        let svc = service(&gateway, &intake);
        let survey_id = seeded(&svc).await;

        let request = SurveyUpdate {
            survey_id,
            fields: fields("Site A"),
            keep_image_ids: vec![ImageId::from(1), ImageId::from(3)],
            attachments: vec![],
        };

        svc.update_survey(request.clone()).await.unwrap();
        let after_first = ids(&svc.list_images(survey_id).await.unwrap());

        let second = svc.update_survey(request).await.unwrap();
        let after_second = ids(&svc.list_images(survey_id).await.unwrap());

        assert_eq!(after_first, vec![1, 3]);
        assert_eq!(after_second, after_first);
        assert!(second.removed_image_ids.is_empty());
    }

    #[tokio::test]
    async fn failed_update_restores_fields_and_images() {
        let gateway = Arc::new(MemoryGateway::new());
        let intake = Arc::new(ScriptedIntake::new().fail_on("broken.jpg"));
        let svc = service(&gateway, &intake);
        let survey_id = seeded(&svc).await;

        let err = svc
            .update_survey(SurveyUpdate {
                survey_id,
                fields: fields("Should not stick"),
                keep_image_ids: vec![ImageId::from(1)],
                attachments: vec![jpg("ok.jpg"), jpg("broken.jpg")],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::PersistAttachment { .. }));
        let detail = svc.get_survey(survey_id).await.unwrap();
        assert_eq!(detail.survey.title, "Site A");
        assert_eq!(ids(&detail.images), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn update_failure_at_each_storage_step_rolls_back() {
        for fail_point in [FailPoint::UpdateSurvey, FailPoint::SelectImages, FailPoint::DeleteImages] {
            let gateway = Arc::new(MemoryGateway::new());
            let intake = Arc::new(ScriptedIntake::new());
            let svc = service(&gateway, &intake);
            let survey_id = seeded(&svc).await;
            gateway.arm(fail_point);

            let result = svc
                .update_survey(SurveyUpdate {
                    survey_id,
                    fields: fields("Changed"),
                    keep_image_ids: vec![],
                    attachments: vec![],
                })
                .await;

            assert!(result.is_err(), "{:?} should fail", fail_point);
            let detail = svc.get_survey(survey_id).await.unwrap();
            assert_eq!(detail.survey.title, "Site A", "{:?}", fail_point);
            assert_eq!(detail.images.len(), 3, "{:?}", fail_point);
        }
    }

    #[tokio::test]
    async fn failed_image_insert_during_update_restores_title_and_images() {
        let gateway = Arc::new(MemoryGateway::new());
        let intake = Arc::new(ScriptedIntake::new());
        let svc = service(&gateway, &intake);
        let survey_id = seeded(&svc).await;
        gateway.arm(FailPoint::InsertImage { nth: 2 });

        let err = svc
            .update_survey(SurveyUpdate {
                survey_id,
                fields: fields("Changed"),
                keep_image_ids: vec![ImageId::from(1)],
                attachments: vec![jpg("new1.jpg"), jpg("new2.jpg")],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::InsertImage { .. }), "{:?}", err);
        let detail = svc.get_survey(survey_id).await.unwrap();
        assert_eq!(detail.survey.title, "Site A");
        assert_eq!(ids(&detail.images), vec![1, 2, 3]);
        assert_eq!(gateway.commits(), 1);
        assert_eq!(gateway.rollbacks(), 1);
    }

    #[tokio::test]
    async fn failed_commit_persists_nothing() {
        let gateway = Arc::new(MemoryGateway::new().fail_at(FailPoint::Commit));
        let intake = Arc::new(ScriptedIntake::new());
        let svc = service(&gateway, &intake);

        let err = svc
            .create_survey(NewSurvey {
                fields: fields("Site A"),
                attachments: vec![jpg("img1.jpg"), jpg("img2.jpg")],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Commit(_)), "{:?}", err);
        let snapshot = gateway.snapshot();
        assert!(snapshot.surveys.is_empty());
        assert!(snapshot.images.is_empty());
        assert_eq!(gateway.commits(), 0);
    }

    #[tokio::test]
    async fn update_of_missing_or_deleted_survey_is_not_found() {
        let gateway = Arc::new(MemoryGateway::new());
        let intake = Arc::new(ScriptedIntake::new());
        let svc = service(&gateway, &intake);

        let request = |survey_id| SurveyUpdate {
            survey_id,
            fields: fields("X"),
            keep_image_ids: vec![],
            attachments: vec![jpg("x.jpg")],
        };

        let err = svc.update_survey(request(42)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::SurveyNotFound(42)));

        let survey_id = seeded(&svc).await;
        svc.delete_survey(survey_id).await.unwrap();
        let err = svc.update_survey(request(survey_id)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::SurveyNotFound(_)));
        assert!(gateway.snapshot().images.is_empty());
    }

    #[tokio::test]
    async fn soft_deleted_surveys_disappear_from_reads() {
        let gateway = Arc::new(MemoryGateway::new());
        let intake = Arc::new(ScriptedIntake::new());
        let svc = service(&gateway, &intake);
        let survey_id = seeded(&svc).await;

        svc.delete_survey(survey_id).await.unwrap();

        assert!(svc.list_surveys(None, None).await.unwrap().is_empty());
        assert!(matches!(svc.get_survey(survey_id).await, Err(DatabaseError::NotFound(_))));
        assert!(matches!(svc.delete_survey(survey_id).await, Err(DatabaseError::NotFound(_))));
        // The row is retained, only stamped; its images go with it
        let snapshot = gateway.snapshot();
        assert!(snapshot.surveys[&survey_id].deleted_at.is_some());
        assert!(snapshot.images.values().all(|image| image.survey_id != survey_id));
    }
}
