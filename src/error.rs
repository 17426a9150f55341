use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::models::ValidationError;
use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub message: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")] Validation(String),
    #[error("{0}")] Conflict(String),
    #[error("Unauthorized")] Unauthenticated,
    #[error("Incorrect username or password")] InvalidCredentials,
    #[error("Forbidden")] Forbidden,
    #[error("{0} not found")] NotFound(&'static str),
    #[error("internal error")] Internal,
}

impl ApiError {
    /// Logs the cause and hides it from the client.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        log::error!("internal error: {cause}");
        ApiError::Internal
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Validation(e.0)
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::Validation("referenced record does not exist".into()),
            RepoError::Conflict => ApiError::Conflict("record already exists".into()),
            RepoError::Internal(cause) => ApiError::internal(cause),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::Validation(_) | ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiErrorBody { message: self.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::Conflict("Email already in use".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("Habit").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(RepoError::Internal("boom".into())).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_message_names_the_entity() {
        assert_eq!(ApiError::NotFound("Habit log").to_string(), "Habit log not found");
    }
}
