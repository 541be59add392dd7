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

//! Shared plumbing for the Google REST adapters: URL building and turning
//! non-2xx responses into `ExportError`s.

use crate::domain::errors::{ExportError, Result};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

/// The `{"error": {...}}` envelope every Google JSON API uses.
#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorBody,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    #[serde(default)]
    message: String,
}

/// Appends path segments to `base`. Each segment is percent-encoded on its
/// own, so object names containing `/` stay a single segment.
pub(crate) fn endpoint_url(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| ExportError::ConfigError(format!("Invalid endpoint {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| ExportError::ConfigError(format!("Endpoint cannot be a base URL: {}", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Converts an unsuccessful response into the matching error variant,
/// preferring the message Google put in the error envelope.
pub(crate) async fn error_from_response(response: Response) -> ExportError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<GoogleErrorEnvelope>(&body)
        .ok()
        .map(|e| e.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                body
            }
        });
    ExportError::from_status(status.as_u16(), message)
}

/// Sends the request and returns the response if it was a 2xx.
pub(crate) async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    Ok(response)
}

/// Sends the request and decodes a JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = send(request).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Parses the millisecond timestamps BigQuery returns as strings.
pub(crate) fn parse_millis(value: Option<&str>) -> Option<chrono::DateTime<chrono::Utc>> {
    value
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(chrono::DateTime::from_timestamp_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_encodes_segments() {
        let url = endpoint_url(
            "https://storage.googleapis.com/",
            &["storage", "v1", "b", "bucket", "o", "dir/export-000000000000.csv"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/bucket/o/dir%2Fexport-000000000000.csv"
        );
    }

    #[test]
    fn test_endpoint_url_keeps_base_path() {
        let url = endpoint_url("http://localhost:9000/bigquery/v2", &["projects", "p", "jobs"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/bigquery/v2/projects/p/jobs"
        );
    }

    #[test]
    fn test_parse_millis() {
        let ts = parse_millis(Some("1700000000000")).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert!(parse_millis(Some("soon")).is_none());
        assert!(parse_millis(None).is_none());
    }
}
