//! Response envelope shared by every route.
//!
//! Success: `{"success": true, "data": ...}`.
//! Failure: `{"success": false, "error": {"kind": "...", "message": "..."}}`.

use axum::Json;
use axum::response::{IntoResponse, Response};
use axum::http::{HeaderValue, StatusCode, header};
use serde::Serialize;
use tracing::{error, warn};

use cdk_common::error::{Error, ErrorKind};

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// Successful payload with its status code.
pub struct ApiResponse<T>(pub StatusCode, pub T);

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Self {
        Self(StatusCode::CREATED, data)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = Envelope {
            success: true,
            data: Some(self.1),
            error: None,
        };
        (self.0, Json(body)).into_response()
    }
}

/// Failure side of every handler.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidParameters => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::CodeNotFound | ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::CodeAlreadyUsed => StatusCode::CONFLICT,
        ErrorKind::CodeExpired => StatusCode::GONE,
        ErrorKind::Busy => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);

        match kind {
            // Full text stays in the log; the caller gets the generic message.
            ErrorKind::Internal => error!(kind = %kind, error = %self.0, "Request failed"),
            ErrorKind::Busy => warn!(kind = %kind, error = %self.0, "Request timed out"),
            _ => {}
        }

        let retry_after = match &self.0 {
            Error::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        };

        let body: Envelope<()> = Envelope {
            success: false,
            data: None,
            error: Some(ErrorBody {
                kind,
                message: self.0.public_message(),
            }),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
