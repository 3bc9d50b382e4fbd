use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{scope} quota exceeded")]
    RateLimited {
        scope: String,
        limit: u32,
        remaining: u32,
        retry_after_secs: Option<u64>,
    },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::QuotaExceeded {
                scope,
                limit,
                remaining,
                retry_after_secs,
            } => Self::RateLimited {
                scope: scope.to_string(),
                limit,
                remaining,
                retry_after_secs,
            },
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::AccessDenied(msg) => Self::Forbidden(msg),
            AppError::Upstream(msg) => {
                tracing::error!("Upstream failure: {msg}");
                Self::ServiceUnavailable("Upstream collaborator unavailable".to_owned())
            }
            AppError::OpenAI(ref e) => {
                tracing::error!("OpenAI failure: {e:?}");
                Self::ServiceUnavailable("Upstream collaborator unavailable".to_owned())
            }
            _ => {
                tracing::error!("Internal error: {err:?}");
                Self::InternalError("Internal server error".to_owned())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            Self::InternalError(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(message),
            ),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, ErrorResponse::new(message)),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, ErrorResponse::new(message)),
            Self::Forbidden(message) => (StatusCode::FORBIDDEN, ErrorResponse::new(message)),
            Self::ServiceUnavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorResponse::new(message))
            }
            Self::RateLimited {
                scope,
                limit,
                remaining,
                ..
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorResponse {
                    error: format!("{scope} quota exceeded"),
                    status: "error".to_owned(),
                    limit: Some(*limit),
                    remaining: Some(*remaining),
                },
            ),
        };

        let retry_after = match &self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => HeaderValue::from_str(&secs.to_string()).ok(),
            _ => None,
        };

        let mut response = (status, Json(error_response)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<u32>,
}

impl ErrorResponse {
    fn new(message: &str) -> Self {
        Self {
            error: message.to_owned(),
            status: "error".to_owned(),
            limit: None,
            remaining: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::error::QuotaScope;
    use std::fmt::Debug;

    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn app_errors_map_to_api_errors() {
        let validation = AppError::Validation("query text must not be empty".to_owned());
        assert!(matches!(
            ApiError::from(validation),
            ApiError::ValidationError(msg) if msg == "query text must not be empty"
        ));

        let denied = AppError::AccessDenied("tenant mismatch".to_owned());
        assert!(matches!(
            ApiError::from(denied),
            ApiError::Forbidden(msg) if msg == "tenant mismatch"
        ));

        let quota = AppError::QuotaExceeded {
            scope: QuotaScope::PerMinute,
            limit: 60,
            remaining: 0,
            retry_after_secs: Some(12),
        };
        assert!(matches!(
            ApiError::from(quota),
            ApiError::RateLimited {
                limit: 60,
                retry_after_secs: Some(12),
                ..
            }
        ));

        let upstream = AppError::Upstream("model timed out".to_owned());
        assert!(matches!(
            ApiError::from(upstream),
            ApiError::ServiceUnavailable(_)
        ));

        // Internal detail never leaks through the generic mapping.
        let internal = AppError::InternalError("db password incorrect".to_owned());
        assert!(matches!(
            ApiError::from(internal),
            ApiError::InternalError(msg) if msg == "Internal server error"
        ));
    }

    #[test]
    fn status_codes_match_error_kinds() {
        assert_status_code(
            ApiError::InternalError("boom".to_owned()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(
            ApiError::ValidationError("bad".to_owned()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(
            ApiError::Unauthorized("who".to_owned()),
            StatusCode::UNAUTHORIZED,
        );
        assert_status_code(
            ApiError::Forbidden("not yours".to_owned()),
            StatusCode::FORBIDDEN,
        );
        assert_status_code(
            ApiError::ServiceUnavailable("down".to_owned()),
            StatusCode::SERVICE_UNAVAILABLE,
        );
    }

    #[test]
    fn rate_limited_responses_carry_retry_after() {
        let error = ApiError::RateLimited {
            scope: "per-minute".to_owned(),
            limit: 60,
            remaining: 0,
            retry_after_secs: Some(42),
        };
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER),
            Some(&HeaderValue::from_static("42"))
        );

        let without = ApiError::RateLimited {
            scope: "daily".to_owned(),
            limit: 50,
            remaining: 0,
            retry_after_secs: None,
        };
        let response = without.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(RETRY_AFTER).is_none());
    }
}
