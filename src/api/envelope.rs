//! Consistent response envelope for all v2 API endpoints.
//!
//! Every v2 response is wrapped in either [`ApiResponse`] (success) or
//! [`ApiErrorResponse`] (error), ensuring a uniform JSON shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

use crate::pipeline::EngineError;

/// Metadata included in every v2 response.
#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
    pub version: &'static str,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: "2",
        }
    }
}

/// Successful v2 response: `{ "data": T, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Response {
        Self::with_status(StatusCode::OK, data)
    }

    /// For resources that were just appended (scored recordings).
    pub fn created(data: T) -> Response {
        Self::with_status(StatusCode::CREATED, data)
    }

    fn with_status(status: StatusCode, data: T) -> Response {
        let body = Self {
            data,
            meta: ResponseMeta::default(),
        };
        (status, axum::Json(body)).into_response()
    }
}

/// Error detail inside [`ApiErrorResponse`].
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Error v2 response: `{ "error": { "code": "...", "message": "..." }, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
    pub meta: ResponseMeta,
}

impl ApiErrorResponse {
    fn build(status: StatusCode, code: &str, msg: impl Into<String>) -> Response {
        let body = Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: msg.into(),
            },
            meta: ResponseMeta::default(),
        };
        (status, axum::Json(body)).into_response()
    }

    pub fn not_found(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::NOT_FOUND, "NOT_FOUND", msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
    }

    pub fn internal(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
    }

    /// Map a scoring engine failure onto the matching status.
    pub fn from_engine(err: &EngineError) -> Response {
        match err {
            EngineError::UnknownCaptureSet(_) => Self::not_found(err.to_string()),
            EngineError::InvalidRange(_) => {
                Self::build(StatusCode::BAD_REQUEST, "INVALID_RANGE", err.to_string())
            }
            EngineError::InvalidRecording(_) => Self::bad_request(err.to_string()),
            EngineError::Storage(_) => Self::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ok_response_shape() {
        let resp = ApiResponse::ok(serde_json::json!({"hello": "world"}));
        assert_eq!(resp.status(), StatusCode::OK);

        let v = body_json(resp).await;
        assert!(v.get("data").is_some());
        assert_eq!(v["meta"]["version"], "2");
    }

    #[tokio::test]
    async fn test_engine_errors_map_to_status() {
        let resp = ApiErrorResponse::from_engine(&EngineError::UnknownCaptureSet("x".into()));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let v = body_json(resp).await;
        assert_eq!(v["error"]["code"], "NOT_FOUND");
        assert_eq!(v["error"]["message"], "unknown capture set 'x'");

        let resp = ApiErrorResponse::from_engine(&EngineError::InvalidRecording("bad date".into()));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
