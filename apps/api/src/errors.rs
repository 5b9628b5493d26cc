use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::nlp_client::NlpError;
use crate::workflow::{ApprovalStage, RequestStatus, TransitionError};

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("NLP service error: {0}")]
    Nlp(#[from] NlpError),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::AlreadyFinal(_) => AppError::Conflict(err.to_string()),
            // The line manager already acted; the request is now waiting on HR.
            TransitionError::WrongStage {
                status: RequestStatus::PendingHr,
                stage: ApprovalStage::LineManager,
            } => AppError::Conflict(err.to_string()),
            TransitionError::WrongStage { .. } => AppError::UnprocessableEntity(err.to_string()),
            TransitionError::CommentRequired => AppError::Validation(err.to_string()),
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::UnprocessableEntity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE_ENTITY",
                msg.clone(),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Access denied".to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Nlp(e) => {
                tracing::error!("NLP service error: {e}");
                (
                    StatusCode::BAD_GATEWAY,
                    "NLP_ERROR",
                    "The skill extraction service is unavailable".to_string(),
                )
            }
            AppError::S3(msg) => {
                tracing::error!("S3 error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "S3_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::NotFound("x".into()).parts().0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Conflict("x".into()).parts().0,
            StatusCode::CONFLICT
        );
        assert_eq!(AppError::Forbidden.parts().0, StatusCode::FORBIDDEN);
        assert_eq!(AppError::Unauthorized.parts().0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Nlp(NlpError::EmptyResponse).parts().0,
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let (_, code, message) =
            AppError::Internal(anyhow::anyhow!("secret connection string")).parts();
        assert_eq!(code, "INTERNAL_ERROR");
        assert!(!message.contains("secret"));
    }

    #[test]
    fn test_final_transition_maps_to_conflict() {
        let err: AppError = TransitionError::AlreadyFinal(RequestStatus::Approved).into();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_wrong_stage_maps_to_unprocessable() {
        let err: AppError = TransitionError::WrongStage {
            status: RequestStatus::PendingLm,
            stage: ApprovalStage::Hr,
        }
        .into();
        assert!(matches!(err, AppError::UnprocessableEntity(_)));
    }

    #[test]
    fn test_repeated_line_manager_decision_maps_to_conflict() {
        let err: AppError = TransitionError::WrongStage {
            status: RequestStatus::PendingHr,
            stage: ApprovalStage::LineManager,
        }
        .into();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
