//! Request-boundary error type and its JSON rendering.

use crate::auth::AuthError;
use crate::records::ValidationError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

/// Every failure a handler can return. Rendered as
/// `{"success": false, "error": "..."}` with optional `code` / `action`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Record not found")]
    NotFound,

    #[error("Too many login attempts. Please retry later.")]
    RateLimited { retry_after_secs: u64 },

    /// Storage or library failure. Details are logged, never returned.
    #[error("Internal server error")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth(AuthError::Forbidden) => StatusCode::FORBIDDEN,
            Self::Auth(AuthError::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });

        match &self {
            Self::Auth(err) => {
                body["code"] = err.code().into();
                if *err == AuthError::InvalidToken {
                    body["action"] = "reauthenticate".into();
                }
            }
            Self::Validation(_) | Self::BadRequest(_) => body["code"] = "validation".into(),
            Self::NotFound => body["code"] = "not_found".into(),
            Self::RateLimited { retry_after_secs } => {
                body["code"] = "rate_limited".into();
                body["retry_after"] = (*retry_after_secs).into();
            }
            Self::Internal(e) => tracing::error!("Request failed: {e:#}"),
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn render(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn missing_and_invalid_tokens_are_distinguishable() {
        let (status, missing) = render(AuthError::MissingCredential.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(missing["code"], "missing_credential");
        assert!(missing.get("action").is_none());

        let (status, invalid) = render(AuthError::InvalidToken.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(invalid["code"], "invalid_token");
        assert_eq!(invalid["action"], "reauthenticate");
        assert_eq!(invalid["success"], false);
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let (status, body) = render(anyhow::anyhow!("disk on fire at /var/db").into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn validation_errors_are_bad_requests() {
        let (status, body) =
            render(ValidationError::Missing("email".into()).into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required field: email");
    }

    #[test]
    fn forbidden_maps_to_403() {
        assert_eq!(
            ApiError::from(AuthError::Forbidden).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
    }
}
