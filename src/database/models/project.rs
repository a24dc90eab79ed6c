use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use super::{require, trimmed, CreateError, SoftDelete};
use crate::database::manager::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub client: Option<String>,
    pub location: Option<String>,
    pub status: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SoftDelete for Project {
    const TABLE: &'static str = "projects";
}

/// JSON body for project creation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewProject {
    pub name: Option<String>,
    pub client: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
}

impl NewProject {
    pub async fn insert(&self, pool: &PgPool) -> Result<Project, CreateError> {
        let name = require(&self.name, "name")?;
        let status = trimmed(&self.status).unwrap_or_else(|| "active".to_string());

        let project = sqlx::query_as::<_, Project>(
            "INSERT INTO projects (name, client, location, status, description)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, name, client, location, status, description, created_at, updated_at, deleted_at",
        )
        .bind(name)
        .bind(trimmed(&self.client))
        .bind(trimmed(&self.location))
        .bind(status)
        .bind(trimmed(&self.description))
        .fetch_one(pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(project)
    }
}
