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

//! Core error definitions for the BigQuery table exporter.
//!
//! This module provides a centralized `ExportError` enum and a `Result` type
//! used throughout the application. Every remote failure is classified into
//! one of these variants so that callers can decide whether to retry, resume
//! or give up.

use thiserror::Error;

/// Error types encountered during the export workflow.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Malformed input or an unresolvable table reference. Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller (or the service identity) lacks the required IAM role.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A job id or object that does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network failure, throttling or a 5xx from Google. Retried with backoff.
    #[error("Transient service error: {message}")]
    TransientServiceError {
        status: Option<u16>,
        message: String,
    },

    /// Terminal remote failure. The message is the remote error, verbatim.
    #[error("{message}")]
    JobFailed { job_id: String, message: String },

    /// The local polling budget ran out. The remote job keeps running.
    #[error("Timed out after {waited_secs}s waiting for job {job_id}; polling can be resumed")]
    Timeout { job_id: String, waited_secs: u64 },

    /// A download or merge was requested before the job succeeded.
    #[error("Job {job_id} is not complete (state: {state})")]
    JobNotReady { job_id: String, state: String },

    /// A succeeded job whose destination pattern matches no objects.
    #[error("No output shards found for {0}")]
    NoShardsFound(String),

    /// Local admission control turned the request away.
    #[error("Too many concurrent exports (limit {limit})")]
    AdmissionRejected { limit: usize },

    #[error("Merge failed: {0}")]
    MergeError(String),

    /// Any other non-retryable error reported by a Google API.
    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ExportError {
    /// Only transient service errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExportError::TransientServiceError { .. })
    }

    /// Stable machine-readable code used in API error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            ExportError::InvalidRequest(_) => "INVALID_REQUEST",
            ExportError::PermissionDenied(_) => "PERMISSION_DENIED",
            ExportError::NotFound(_) => "NOT_FOUND",
            ExportError::TransientServiceError { .. } => "TRANSIENT_SERVICE_ERROR",
            ExportError::JobFailed { .. } => "JOB_FAILED",
            ExportError::Timeout { .. } => "TIMEOUT",
            ExportError::JobNotReady { .. } => "JOB_NOT_READY",
            ExportError::NoShardsFound(_) => "NO_SHARDS_FOUND",
            ExportError::AdmissionRejected { .. } => "ADMISSION_REJECTED",
            ExportError::MergeError(_) => "MERGE_FAILED",
            ExportError::ServiceError(_) => "SERVICE_ERROR",
            ExportError::ConfigError(_) => "CONFIG_ERROR",
            ExportError::IoError(_) => "IO_ERROR",
        }
    }

    /// Classifies an HTTP status returned by a Google API.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => ExportError::InvalidRequest(message),
            401 | 403 => ExportError::PermissionDenied(message),
            404 => ExportError::NotFound(message),
            408 | 429 | 500..=599 => ExportError::TransientServiceError {
                status: Some(status),
                message,
            },
            _ => ExportError::ServiceError(format!("HTTP {}: {}", status, message)),
        }
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return ExportError::ServiceError(format!("Unexpected response body: {}", e));
        }
        match e.status() {
            Some(status) => ExportError::from_status(status.as_u16(), e.to_string()),
            None => ExportError::TransientServiceError {
                status: None,
                message: e.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::ServiceError(format!("Malformed JSON: {}", e))
    }
}

/// A specialized Result type for the exporter.
pub type Result<T> = std::result::Result<T, ExportError>;
