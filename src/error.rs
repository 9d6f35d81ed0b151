use thiserror::Error;
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Invalid data: {}", .details.join(", "))]
    ValidationError {
        message: String,
        details: Vec<String>,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the same identity already exists. `id` points at it.
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        id: Option<String>,
    },

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>, details: Vec<String>) -> Self {
        AppError::ValidationError {
            message: message.into(),
            details,
        }
    }

    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{} not found", what))
    }

    pub fn conflict(message: impl Into<String>, id: Option<String>) -> Self {
        AppError::Conflict {
            message: message.into(),
            id,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError { .. } | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::DatabaseError(_)
            | AppError::InternalError(_)
            | AppError::SerializationError(_)
            | AppError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            AppError::ValidationError { message, details } => {
                HttpResponse::build(status).json(serde_json::json!({
                    "error": message,
                    "details": details
                }))
            }
            AppError::BadRequest(msg) | AppError::NotFound(msg) => {
                HttpResponse::build(status).json(serde_json::json!({
                    "error": msg
                }))
            }
            AppError::Conflict { message, id: Some(id) } => {
                HttpResponse::build(status).json(serde_json::json!({
                    "error": message,
                    "threadId": id
                }))
            }
            AppError::Conflict { message, id: None } => {
                HttpResponse::build(status).json(serde_json::json!({
                    "error": message
                }))
            }
            AppError::DatabaseError(e) => {
                log::error!("Database error: {}", e);
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "Database error occurred",
                    "details": e.to_string()
                }))
            }
            AppError::InternalError(msg) => {
                log::error!("Internal error: {}", msg);
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "Internal server error",
                    "details": msg
                }))
            }
            AppError::SerializationError(e) => {
                log::error!("Serialization error: {}", e);
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "Internal server error",
                    "details": e.to_string()
                }))
            }
            AppError::IoError(e) => {
                log::error!("IO error: {}", e);
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "IO error occurred",
                    "details": e.to_string()
                }))
            }
        }
    }
}

/// True when the database rejected a write because of a UNIQUE constraint.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::not_found("Project").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::validation("Invalid email data", vec!["Subject is required".into()]).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::conflict("dup", None).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::InternalError("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_message() {
        match AppError::not_found("Timeline") {
            AppError::NotFound(msg) => assert_eq!(msg, "Timeline not found"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
