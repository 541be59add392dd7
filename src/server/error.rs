// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error responses for the HTTP API.
//!
//! Every failure is rendered as `{"error": <message>, "code": <CODE>}` with a
//! status derived from the error variant.

use crate::domain::errors::ExportError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, warn};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum ApiError {
    Export(ExportError),
    /// Missing or rejected bearer token.
    Unauthorized(String),
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        ApiError::Export(e)
    }
}

pub fn status_for(e: &ExportError) -> StatusCode {
    match e {
        ExportError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ExportError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        ExportError::NotFound(_) => StatusCode::NOT_FOUND,
        ExportError::JobNotReady { .. } => StatusCode::CONFLICT,
        ExportError::AdmissionRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
        ExportError::JobFailed { .. } => StatusCode::BAD_GATEWAY,
        ExportError::TransientServiceError { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ExportError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ExportError::NoShardsFound(_)
        | ExportError::MergeError(_)
        | ExportError::ServiceError(_)
        | ExportError::ConfigError(_)
        | ExportError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Export(e) => {
                let status = status_for(&e);
                if status.is_server_error() {
                    error!("Request failed: {}", e);
                } else {
                    warn!("Request rejected: {}", e);
                }
                (
                    status,
                    ErrorBody {
                        error: e.to_string(),
                        code: e.code().to_string(),
                    },
                )
            }
            ApiError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: message,
                    code: "UNAUTHORIZED".to_string(),
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}
