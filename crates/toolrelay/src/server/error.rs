use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::error::RelayError;
use crate::relay::ExecutionFailure;
use crate::utils::time::now_rfc3339;

/// Standardised API error response.
///
/// Every error returned by the HTTP layer serialises as:
/// ```json
/// { "success": false, "error": { "code": "<code>", "message": "<message>" },
///   "executionId": "..", "executionTimeMs": 12, "timestamp": "..", "details": {..} }
/// ```
/// `executionId`, `executionTimeMs` and `details` are omitted when absent.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorResponse,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: ApiErrorBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorResponse {
                success: false,
                error: ApiErrorBody {
                    code: code.into(),
                    message: message.into(),
                },
                execution_id: None,
                execution_time_ms: None,
                timestamp: now_rfc3339(),
                details: None,
            },
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.body.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_execution_time_ms(mut self, execution_time_ms: u64) -> Self {
        self.body.execution_time_ms = Some(execution_time_ms);
        self
    }

    pub fn with_details(mut self, details: Option<Value>) -> Self {
        self.body.details = details;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &ApiErrorResponse {
        &self.body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let status = if err.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, err.code(), err.to_string())
    }
}

impl From<ExecutionFailure> for ApiError {
    fn from(failure: ExecutionFailure) -> Self {
        Self::from(failure.error)
            .with_execution_id(failure.execution_id)
            .with_execution_time_ms(failure.execution_time_ms)
            .with_details(failure.details)
    }
}
