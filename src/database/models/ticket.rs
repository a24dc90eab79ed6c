use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use super::{require, trimmed, CreateError, SoftDelete};
use crate::database::manager::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub reporter_name: String,
    pub reporter_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SoftDelete for Ticket {
    const TABLE: &'static str = "tickets";
}

/// JSON body for ticket creation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTicket {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub reporter_name: Option<String>,
    pub reporter_email: Option<String>,
}

impl NewTicket {
    pub async fn insert(&self, pool: &PgPool) -> Result<Ticket, CreateError> {
        let title = require(&self.title, "title")?;
        let reporter_name = require(&self.reporter_name, "reporter_name")?;
        let status = trimmed(&self.status).unwrap_or_else(|| "open".to_string());

        let ticket = sqlx::query_as::<_, Ticket>(
            "INSERT INTO tickets (title, description, status, reporter_name, reporter_email)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, title, description, status, reporter_name, reporter_email, created_at, updated_at, deleted_at",
        )
        .bind(title)
        .bind(trimmed(&self.description))
        .bind(status)
        .bind(reporter_name)
        .bind(trimmed(&self.reporter_email))
        .fetch_one(pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(ticket)
    }
}
