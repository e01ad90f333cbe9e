use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use laudo_core::{ErrorKind, LaudoError};
use serde::Serialize;
use utoipa::ToSchema;

/// JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable category, e.g. `conflict` or `certificate`.
    pub error: String,
    pub message: String,
}

/// Error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    message: String,
}

impl ApiError {
    pub fn unauthenticated(message: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: "unauthenticated".into(),
            message: message.to_owned(),
        }
    }

    /// Maps a core error, hiding internal detail unless `expose_detail` is set.
    pub fn from_core(error: LaudoError, expose_detail: bool) -> Self {
        let kind = error.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Permission => StatusCode::FORBIDDEN,
            ErrorKind::Certificate => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Storage => StatusCode::BAD_GATEWAY,
            ErrorKind::Render | ErrorKind::Repository | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = if kind.is_user_facing() {
            error.detail().to_owned()
        } else {
            tracing::error!(kind = ?kind, error = %error, "request failed");
            if expose_detail {
                error.to_string()
            } else {
                "the request could not be completed".to_owned()
            }
        };

        Self {
            status,
            error: kind_name(kind),
            message,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn kind_name(kind: ErrorKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| "internal".to_owned())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_detail_is_hidden_by_default() {
        let hidden = ApiError::from_core(LaudoError::Storage("bucket x refused key k".into()), false);
        assert_eq!(hidden.status(), StatusCode::BAD_GATEWAY);
        assert!(!hidden.message.contains("bucket"));
        assert_eq!(hidden.error, "storage");

        let exposed = ApiError::from_core(LaudoError::Storage("bucket x refused key k".into()), true);
        assert!(exposed.message.contains("bucket"));
    }

    #[test]
    fn user_facing_detail_is_always_returned() {
        let err = ApiError::from_core(LaudoError::Conflict("exam already has a report".into()), false);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.message, "exam already has a report");
    }
}
