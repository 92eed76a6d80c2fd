use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use common::extraction_error::{ExtractionError, MetadataError};
use common::google_auth::AuthError;
use common::healthcare::HealthcareError;
use common::utils::get_logger;
use database::portal_dbprovider::DbError;
use serde_json::{Map, Value};
use slog::error;
use thiserror::Error;

/// Every failure a handler or middleware answers with. The body is `{error}` plus
/// `details` or `hash` when present.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        message: String,
        details: Option<Value>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{message}")]
    Forbidden {
        message: String,
        hash: Option<String>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    TooManyRequests(String),

    #[error("{message}")]
    Upstream { message: String, details: Value },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
            details: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden {
            message: message.into(),
            hash: None,
        }
    }

    pub fn missing_parameters() -> Self {
        Self::bad_request("Missing required parameters")
    }

    pub fn invalid_uid() -> Self {
        Self::bad_request("Invalid or missing UID")
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream { .. } | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = Map::new();
        body.insert("error".to_string(), Value::String(self.to_string()));
        match self {
            ApiError::BadRequest {
                details: Some(details),
                ..
            }
            | ApiError::Upstream { details, .. } => {
                body.insert("details".to_string(), details.clone());
            }
            ApiError::Forbidden {
                hash: Some(hash), ..
            } => {
                body.insert("hash".to_string(), Value::String(hash.clone()));
            }
            _ => {}
        }
        HttpResponse::build(self.status_code()).json(Value::Object(body))
    }
}

impl From<HealthcareError> for ApiError {
    fn from(e: HealthcareError) -> Self {
        ApiError::Upstream {
            message: "Error in external service (Healthcare API)".to_string(),
            details: e.details(),
        }
    }
}

impl From<ExtractionError> for ApiError {
    fn from(e: ExtractionError) -> Self {
        ApiError::Upstream {
            message: "Error in external service (metadata extractor)".to_string(),
            details: e.details(),
        }
    }
}

impl From<MetadataError> for ApiError {
    fn from(e: MetadataError) -> Self {
        ApiError::BadRequest {
            message: "DICOM metadata cannot be stored".to_string(),
            details: Some(Value::String(e.to_string())),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidSession(_) | AuthError::Revoked => {
                ApiError::Unauthorized("Invalid session".to_string())
            }
            AuthError::UserNotFound(uid) => ApiError::NotFound(format!("User {} not found", uid)),
            other => ApiError::Upstream {
                message: "Error in external service (Firebase Auth)".to_string(),
                details: other.details(),
            },
        }
    }
}

/// Database text names tables and constraints, so it is logged and the
/// caller only sees a generic message.
impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        error!(get_logger(), "Database error: {}", e);
        ApiError::Internal("Internal server error".to_string())
    }
}
