pub mod project;
pub mod survey;
pub mod technician_team;
pub mod ticket;
pub mod user;

use thiserror::Error;

pub use project::{NewProject, Project};
pub use survey::{Survey, SurveyDetail, SurveyFields, SurveyImage};
pub use technician_team::{NewTechnicianTeam, TechnicianTeam};
pub use ticket::{NewTicket, Ticket};
pub use user::{User, UserProfile};

/// Entities that are retired by stamping `deleted_at` instead of being removed.
///
/// `Repository<T>` relies on this to hide retired rows from every read and to
/// implement `soft_delete`; nothing else should spell out the predicate.
pub trait SoftDelete {
    /// Table the entity lives in. Must be a plain identifier.
    const TABLE: &'static str;
}

/// A create payload lacked a mandatory field
#[derive(Debug, Error)]
#[error("{0} is required")]
pub struct MissingField(pub &'static str);

pub(crate) fn require(value: &Option<String>, field: &'static str) -> Result<String, MissingField> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(MissingField(field))
}

pub(crate) fn trimmed(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

#[derive(Debug, Error)]
pub enum CreateError {
    #[error(transparent)]
    Missing(#[from] MissingField),

    #[error(transparent)]
    Database(#[from] crate::database::manager::DatabaseError),
}
