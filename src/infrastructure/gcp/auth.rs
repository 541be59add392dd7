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

//! # Credential Adapters
//!
//! Outgoing calls authenticate with OAuth2 access tokens from one of two
//! providers:
//! 1. `AdcCredentialProvider`: Application Default Credentials through
//!    `gcp_auth` (metadata server on Cloud Run, `gcloud` login locally).
//! 2. `StaticTokenProvider`: a fixed token, for emulators and tests.
//!
//! Inbound tokens are checked by `TokenInfoVerifier` against Google's
//! `tokeninfo` endpoint.

use crate::domain::errors::{ExportError, Result};
use crate::infrastructure::gcp::http::send_json;
use crate::ports::credential_port::{CredentialProvider, TokenInfo, TokenVerifier};
use async_trait::async_trait;
use gcp_auth::TokenProvider;
use log::debug;
use serde::Deserialize;
use std::sync::Arc;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const SCOPES: &[&str] = &[CLOUD_PLATFORM_SCOPE];

pub struct AdcCredentialProvider {
    inner: Arc<dyn TokenProvider>,
}

impl AdcCredentialProvider {
    /// Discovers credentials the same way the Google client libraries do.
    pub async fn discover() -> Result<Self> {
        let inner = gcp_auth::provider().await.map_err(|e| {
            ExportError::PermissionDenied(format!("No Google credentials available: {}", e))
        })?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl CredentialProvider for AdcCredentialProvider {
    async fn access_token(&self) -> Result<String> {
        let token = self.inner.token(SCOPES).await.map_err(|e| {
            ExportError::TransientServiceError {
                status: None,
                message: format!("Failed to obtain access token: {}", e),
            }
        })?;
        debug!("Access token refreshed (expires {})", token.expires_at());
        Ok(token.as_str().to_string())
    }
}

pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenInfoResponse {
    #[serde(default)]
    scope: String,
    email: Option<String>,
    expires_in: Option<u64>,
}

/// Verifies bearer tokens with `oauth2/v1/tokeninfo` and insists on the
/// `cloud-platform` scope.
pub struct TokenInfoVerifier {
    http: reqwest::Client,
    endpoint: String,
}

impl TokenInfoVerifier {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TokenVerifier for TokenInfoVerifier {
    async fn verify(&self, token: &str) -> Result<TokenInfo> {
        let request = self
            .http
            .get(&self.endpoint)
            .query(&[("access_token", token)]);

        let info: TokenInfoResponse = send_json(request).await.map_err(|e| match e {
            ExportError::TransientServiceError { .. } => e,
            _ => ExportError::PermissionDenied("Invalid token".to_string()),
        })?;

        let scopes: Vec<String> = info.scope.split_whitespace().map(str::to_string).collect();
        if !scopes.iter().any(|s| s == CLOUD_PLATFORM_SCOPE) {
            return Err(ExportError::PermissionDenied(
                "Token does not have required scope".to_string(),
            ));
        }

        Ok(TokenInfo {
            email: info.email,
            scopes,
            expires_in: info.expires_in,
        })
    }
}
