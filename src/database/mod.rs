pub mod gateway;
pub mod manager;
pub mod models;
pub mod query_builder;
pub mod repository;

pub use gateway::{PgSurveyGateway, SurveyGateway, SurveyUnitOfWork};
pub use manager::{DatabaseError, DatabaseManager};
pub use repository::Repository;
