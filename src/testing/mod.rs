use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::database::gateway::{SurveyGateway, SurveyUnitOfWork};
use crate::database::manager::DatabaseError;
use crate::database::models::{Survey, SurveyFields, SurveyImage};
use crate::uploads::{Attachment, FileIntake, IntakeError};

/// Storage step at which `MemoryGateway` reports an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    InsertSurvey,
    UpdateSurvey,
    SelectImages,
    DeleteImages,
    /// The nth image insert inside one unit of work, counting from 1
    InsertImage { nth: usize },
    Commit,
}

/// Committed rows held by `MemoryGateway`
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub surveys: BTreeMap<i64, Survey>,
    pub images: BTreeMap<i64, SurveyImage>,
    next_survey_id: i64,
    next_image_id: i64,
}

struct Shared {
    state: Mutex<MemoryState>,
    fail_point: Mutex<Option<FailPoint>>,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, point: FailPoint) -> Result<(), DatabaseError> {
        let armed = *self.fail_point.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if armed == Some(point) {
            return Err(DatabaseError::QueryError(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }
}

/// In-memory survey store with transactional units of work.
///
/// `begin` copies the committed state; `commit` swaps the copy back in, so a
/// unit of work that is rolled back or dropped leaves no trace.
#[derive(Clone)]
pub struct MemoryGateway {
    shared: Arc<Shared>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MemoryState::default()),
                fail_point: Mutex::new(None),
                begins: AtomicUsize::new(0),
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
            }),
        }
    }

    pub fn fail_at(self, point: FailPoint) -> Self {
        self.arm(point);
        self
    }

    pub fn arm(&self, point: FailPoint) {
        *self.shared.fail_point.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(point);
    }

    pub fn snapshot(&self) -> MemoryState {
        self.shared.state().clone()
    }

    pub fn begins(&self) -> usize {
        self.shared.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SurveyGateway for MemoryGateway {
    async fn begin(&self) -> Result<Box<dyn SurveyUnitOfWork>, DatabaseError> {
        self.shared.check(FailPoint::Begin)?;
        self.shared.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryUnitOfWork {
            working: self.snapshot(),
            shared: Arc::clone(&self.shared),
            image_inserts: 0,
        }))
    }

    async fn list_surveys(&self, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Survey>, DatabaseError> {
        let state = self.shared.state();
        let skip = offset.unwrap_or(0).max(0) as usize;
        let take = limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(state
            .surveys
            .values()
            .rev()
            .filter(|s| s.deleted_at.is_none())
            .skip(skip)
            .take(take)
            .cloned()
            .collect())
    }

    async fn find_survey(&self, survey_id: i64) -> Result<Option<Survey>, DatabaseError> {
        let state = self.shared.state();
        Ok(state.surveys.get(&survey_id).filter(|s| s.deleted_at.is_none()).cloned())
    }

    async fn list_images(&self, survey_id: i64) -> Result<Vec<SurveyImage>, DatabaseError> {
        let state = self.shared.state();
        Ok(images_of(&state, survey_id))
    }

    async fn soft_delete_survey(&self, survey_id: i64) -> Result<(), DatabaseError> {
        let mut guard = self.shared.state();
        let state = &mut *guard;
        match state.surveys.get_mut(&survey_id) {
            Some(survey) if survey.deleted_at.is_none() => {
                let now = Utc::now();
                survey.deleted_at = Some(now);
                survey.updated_at = now;
                state.images.retain(|_, image| image.survey_id != survey_id);
                Ok(())
            }
            _ => Err(DatabaseError::NotFound(format!("surveys {} not found", survey_id))),
        }
    }
}

fn images_of(state: &MemoryState, survey_id: i64) -> Vec<SurveyImage> {
    state
        .images
        .values()
        .filter(|image| image.survey_id == survey_id)
        .cloned()
        .collect()
}

struct MemoryUnitOfWork {
    working: MemoryState,
    shared: Arc<Shared>,
    image_inserts: usize,
}

#[async_trait]
impl SurveyUnitOfWork for MemoryUnitOfWork {
    async fn insert_survey(&mut self, fields: &SurveyFields) -> Result<i64, DatabaseError> {
        self.shared.check(FailPoint::InsertSurvey)?;
        self.working.next_survey_id += 1;
        let id = self.working.next_survey_id;
        let now = Utc::now();
        self.working.surveys.insert(
            id,
            Survey {
                id,
                title: fields.title.clone(),
                project: fields.project.clone(),
                description: fields.description.clone(),
                survey_date: fields.survey_date,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        );
        Ok(id)
    }

    async fn update_survey(&mut self, survey_id: i64, fields: &SurveyFields) -> Result<u64, DatabaseError> {
        self.shared.check(FailPoint::UpdateSurvey)?;
        match self.working.surveys.get_mut(&survey_id) {
            Some(survey) if survey.deleted_at.is_none() => {
                survey.title = fields.title.clone();
                survey.project = fields.project.clone();
                survey.description = fields.description.clone();
                survey.survey_date = fields.survey_date;
                survey.updated_at = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn select_images(&mut self, survey_id: i64) -> Result<Vec<SurveyImage>, DatabaseError> {
        self.shared.check(FailPoint::SelectImages)?;
        Ok(images_of(&self.working, survey_id))
    }

    async fn delete_images(&mut self, survey_id: i64, image_ids: &[i64]) -> Result<u64, DatabaseError> {
        self.shared.check(FailPoint::DeleteImages)?;
        let before = self.working.images.len();
        self.working
            .images
            .retain(|id, image| !(image.survey_id == survey_id && image_ids.contains(id)));
        Ok((before - self.working.images.len()) as u64)
    }

    async fn insert_image(&mut self, survey_id: i64, path: &str) -> Result<SurveyImage, DatabaseError> {
        self.image_inserts += 1;
        self.shared.check(FailPoint::InsertImage { nth: self.image_inserts })?;
        self.working.next_image_id += 1;
        let image = SurveyImage {
            id: self.working.next_image_id,
            survey_id,
            path: path.to_string(),
            created_at: Utc::now(),
        };
        self.working.images.insert(image.id, image.clone());
        Ok(image)
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let MemoryUnitOfWork { working, shared, .. } = *self;
        shared.check(FailPoint::Commit)?;
        *shared.state() = working;
        shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// File intake that records paths in memory and can refuse named files
#[derive(Default)]
pub struct ScriptedIntake {
    fail_on: Vec<String>,
    stored: Mutex<Vec<String>>,
    sequence: AtomicUsize,
}

impl ScriptedIntake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, file_name: &str) -> Self {
        self.fail_on.push(file_name.to_string());
        self
    }

    pub fn stored(&self) -> Vec<String> {
        self.stored.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn stored_count(&self) -> usize {
        self.stored().len()
    }
}

#[async_trait]
impl FileIntake for ScriptedIntake {
    async fn persist(&self, attachment: &Attachment) -> Result<String, IntakeError> {
        // Let sibling persists interleave
        tokio::task::yield_now().await;

        if self.fail_on.iter().any(|name| name == &attachment.file_name) {
            return Err(IntakeError::Write {
                file_name: attachment.file_name.clone(),
                source: io::Error::new(io::ErrorKind::Other, "injected write failure"),
            });
        }

        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let path = format!("/uploads/{}-{}", n, attachment.file_name);
        self.stored
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(path.clone());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fields() -> SurveyFields {
        SurveyFields {
            title: "t".into(),
            project: "p".into(),
            description: String::new(),
            survey_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn dropped_unit_of_work_leaves_no_trace() {
        let gateway = MemoryGateway::new();
        {
            let mut uow = gateway.begin().await.unwrap();
            uow.insert_survey(&fields()).await.unwrap();
        }
        assert!(gateway.snapshot().surveys.is_empty());

        let mut uow = gateway.begin().await.unwrap();
        let id = uow.insert_survey(&fields()).await.unwrap();
        uow.commit().await.unwrap();
        assert!(gateway.find_survey(id).await.unwrap().is_some());
    }
}
