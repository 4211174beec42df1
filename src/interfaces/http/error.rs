use crate::error::FieldOpsError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Not found")]
    NotFound,

    #[error("Xero integration is not configured")]
    XeroDisabled,

    #[error(transparent)]
    App(#[from] FieldOpsError),
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        ApiError::MalformedPayload(e.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::XeroDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::App(e) => match e {
                FieldOpsError::ValidationError(_)
                | FieldOpsError::UnsupportedMediaType { .. }
                | FieldOpsError::PayloadTooLarge { .. }
                | FieldOpsError::InvalidState(_) => StatusCode::BAD_REQUEST,
                FieldOpsError::NotConnected => StatusCode::CONFLICT,
                FieldOpsError::RemoteError { .. } | FieldOpsError::HttpError(_) => {
                    StatusCode::BAD_GATEWAY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::App(e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!(error = %e, "request failed");
                format!("Error processing document: {e}")
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = |e: FieldOpsError| ApiError::from(e).status();

        assert_eq!(
            status(FieldOpsError::PayloadTooLarge { limit: 10 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(FieldOpsError::NotConnected), StatusCode::CONFLICT);
        assert_eq!(
            status(FieldOpsError::RemoteError {
                status: 500,
                body: String::new()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(FieldOpsError::OcrError("tesseract died".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::InvalidSignature.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_internal_error_detail() {
        let response = ApiError::from(FieldOpsError::OcrError("tesseract died".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body["detail"],
            "Error processing document: OCR error: tesseract died"
        );
    }
}
