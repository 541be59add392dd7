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

//! # Credential Port
//!
//! Credentials are injected, never read from global state: adapters receive
//! a `CredentialProvider` and ask it for a token on every call.

use crate::domain::errors::Result;
use async_trait::async_trait;

/// Supplies OAuth2 access tokens for outgoing Google API calls.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Signs bytes as a service account, for V4 signed URLs.
#[async_trait]
pub trait BlobSigner: Send + Sync {
    fn service_account_email(&self) -> &str;

    async fn sign_blob(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// What an inbound bearer token resolved to.
#[derive(Debug, Clone, Default)]
pub struct TokenInfo {
    pub email: Option<String>,
    pub scopes: Vec<String>,
    pub expires_in: Option<u64>,
}

/// Validates bearer tokens presented to the HTTP API.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<TokenInfo>;
}
