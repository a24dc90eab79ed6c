// handlers/mod.rs - HTTP handlers, one module per resource
//
// Handlers parse requests, call a service or repository, and wrap the result
// in the `{success, message, data}` envelope.

use serde::Deserialize;

pub mod auth;
pub mod form;
pub mod projects;
pub mod surveys;
pub mod technician_teams;
pub mod tickets;
pub mod users;

/// `?limit=&offset=` accepted by every list endpoint
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
