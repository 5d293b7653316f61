//! Database API handlers.
//!
//! Only routed when the server runs on the PostgreSQL store.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::db::schema::{apply_schema, missing_tables, REQUIRED_TABLES, SCHEMA};
use crate::db::DbPool;
use crate::error::AppError;

/// Response for database schema operations.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaOperationResponse {
    /// Operation status.
    pub status: String,

    /// Operation message.
    pub message: String,

    /// Whether the schema is valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,

    /// List of missing tables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<String>>,
}

/// Initialize the database schema.
///
/// `POST /api/db/init`
///
/// Creates the schema and its tables if they don't exist.
pub async fn init_database(
    State(db): State<DbPool>,
) -> Result<Json<SchemaOperationResponse>, AppError> {
    apply_schema(&db).await?;

    Ok(Json(SchemaOperationResponse {
        status: "ok".to_string(),
        message: format!(
            "Schema '{}' initialized with {} tables",
            SCHEMA,
            REQUIRED_TABLES.len()
        ),
        valid: Some(true),
        missing: None,
    }))
}

/// Validate the database schema.
///
/// `GET /api/db/validate`
pub async fn validate_database(
    State(db): State<DbPool>,
) -> Result<Json<SchemaOperationResponse>, AppError> {
    let missing = missing_tables(&db).await?;
    let valid = missing.is_empty();

    Ok(Json(SchemaOperationResponse {
        status: "ok".to_string(),
        message: if valid {
            "Database schema is valid".to_string()
        } else {
            format!("Missing tables: {}", missing.join(", "))
        },
        valid: Some(valid),
        missing: Some(missing),
    }))
}
