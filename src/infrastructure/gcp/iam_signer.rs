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

//! `BlobSigner` backed by the IAM Credentials `signBlob` API, so signed URLs
//! work on Cloud Run without a private key file.

use crate::domain::errors::{ExportError, Result};
use crate::infrastructure::gcp::http::send_json;
use crate::ports::credential_port::{BlobSigner, CredentialProvider};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub struct IamBlobSigner {
    http: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    endpoint: String,
    service_account: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobResponse {
    signed_blob: String,
}

impl IamBlobSigner {
    pub fn new(
        http: reqwest::Client,
        credentials: Arc<dyn CredentialProvider>,
        endpoint: impl Into<String>,
        service_account: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            endpoint: endpoint.into(),
            service_account: service_account.into(),
        }
    }
}

#[async_trait]
impl BlobSigner for IamBlobSigner {
    fn service_account_email(&self) -> &str {
        &self.service_account
    }

    async fn sign_blob(&self, payload: &[u8]) -> Result<Vec<u8>> {
        // The resource name contains ':' so it is formatted rather than
        // pushed as path segments.
        let url = format!(
            "{}/projects/-/serviceAccounts/{}:signBlob",
            self.endpoint.trim_end_matches('/'),
            self.service_account
        );
        let token = self.credentials.access_token().await?;
        let request = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "payload": general_purpose::STANDARD.encode(payload) }));

        let response: SignBlobResponse = send_json(request).await?;
        general_purpose::STANDARD
            .decode(response.signed_blob)
            .map_err(|e| ExportError::ServiceError(format!("signBlob returned invalid base64: {}", e)))
    }
}
