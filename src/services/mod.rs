pub mod survey_service;
pub mod user_service;

pub use survey_service::{
    CreatedSurvey, ImageId, NewSurvey, SurveyForm, SurveyService, SurveyUpdate, UpdatedSurvey, WorkflowError,
    WorkflowStage,
};
pub use user_service::{AccountChanges, AccountError, NewAccount, UserQuery, UserService};
