use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use super::{require, trimmed, CreateError, SoftDelete};
use crate::database::manager::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TechnicianTeam {
    pub id: i64,
    pub name: String,
    pub leader: Option<String>,
    pub members: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SoftDelete for TechnicianTeam {
    const TABLE: &'static str = "technician_teams";
}

/// JSON body for team creation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTechnicianTeam {
    pub name: Option<String>,
    pub leader: Option<String>,
    pub members: Option<String>,
    pub phone: Option<String>,
}

impl NewTechnicianTeam {
    pub async fn insert(&self, pool: &PgPool) -> Result<TechnicianTeam, CreateError> {
        let name = require(&self.name, "name")?;

        let team = sqlx::query_as::<_, TechnicianTeam>(
            "INSERT INTO technician_teams (name, leader, members, phone)
             VALUES ($1, $2, $3, $4)
             RETURNING id, name, leader, members, phone, created_at, updated_at, deleted_at",
        )
        .bind(name)
        .bind(trimmed(&self.leader))
        .bind(trimmed(&self.members))
        .bind(trimmed(&self.phone))
        .fetch_one(pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(team)
    }
}
