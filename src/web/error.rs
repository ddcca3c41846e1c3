use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::types::ErrorResponse;
use crate::actions::ActionError;
use crate::error::{DatabaseError, ScoringError};

pub const DISABLED_FEATURE_MESSAGE: &str = "PR suggestions are disabled in this deployment.";

/// HTTP failure taxonomy. Rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Authentication required.")]
    Unauthorized,

    #[error("Invalid email or password.")]
    InvalidCredentials,

    #[error("This proposal is password protected.")]
    PasswordRequired,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("PR suggestions are disabled in this deployment.")]
    Disabled,

    #[error("The AI service is unavailable right now.")]
    Upstream(String),

    #[error("Internal server error.")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::InvalidCredentials | Self::PasswordRequired => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Disabled => StatusCode::NOT_IMPLEMENTED,
            Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{what} not found."))
    }

    pub fn admin_only() -> Self {
        Self::Forbidden("Administrator access required.".to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity, .. } => {
                let mut what = entity;
                if let Some(first) = what.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                Self::not_found(&what)
            }
            DatabaseError::Constraint(detail) => {
                tracing::debug!(%detail, "Request hit a constraint");
                Self::BadRequest("That conflicts with an existing record.".to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ScoringError> for ApiError {
    fn from(e: ScoringError) -> Self {
        Self::Upstream(e.to_string())
    }
}

impl From<ActionError> for ApiError {
    fn from(e: ActionError) -> Self {
        match e {
            ActionError::Unauthorized => Self::Unauthorized,
            ActionError::Forbidden => Self::Forbidden(e.public_message()),
            ActionError::Validation(message) => Self::BadRequest(message),
            ActionError::NotFound(message) => Self::NotFound(message),
            ActionError::UnknownAction(_) => Self::NotFound(e.public_message()),
            ActionError::Internal(detail) => Self::Internal(detail),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(detail) => tracing::error!(error = %detail, "Request failed"),
            Self::Upstream(detail) => tracing::error!(error = %detail, "AI gateway call failed"),
            _ => {}
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_details_never_reach_the_body() {
        let err = ApiError::from(DatabaseError::Query("relation \"leads\" does not exist".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Internal server error.");
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = ApiError::from(DatabaseError::NotFound {
            entity: "thread".to_string(),
            id: "x".to_string(),
        });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Thread not found.");
    }

    #[test]
    fn disabled_features_are_501() {
        assert_eq!(ApiError::Disabled.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(ApiError::Disabled.to_string(), DISABLED_FEATURE_MESSAGE);
    }
}
