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

//! # Runtime Context
//!
//! Builds the long-lived pieces of the service from configuration:
//! 1. **HTTP client**: one `reqwest::Client` (and its connection pool)
//!    shared by every Google adapter.
//! 2. **Credentials**: a static token when one is configured, Application
//!    Default Credentials otherwise.
//! 3. **Adapters**: BigQuery, Cloud Storage, the optional IAM signer and the
//!    in-memory job registry, assembled into an `ExportService`.

use crate::application::export_service::ExportService;
use crate::config::{AppConfig, DownloadMode};
use crate::domain::errors::{ExportError, Result};
use crate::infrastructure::gcp::auth::{AdcCredentialProvider, StaticTokenProvider, TokenInfoVerifier};
use crate::infrastructure::gcp::bigquery_adapter::BigQueryRestAdapter;
use crate::infrastructure::gcp::iam_signer::IamBlobSigner;
use crate::infrastructure::gcp::storage_adapter::GcsRestAdapter;
use crate::infrastructure::memory::job_registry::InMemoryJobRegistry;
use crate::ports::credential_port::{BlobSigner, CredentialProvider, TokenVerifier};
use log::info;
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = concat!("bq-table-exporter/", env!("CARGO_PKG_VERSION"));

/// Shared resources that live as long as the process.
pub struct RuntimeContext {
    pub service: Arc<ExportService>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl RuntimeContext {
    pub async fn init(config: AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ExportError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        let credentials: Arc<dyn CredentialProvider> = match &config.gcp.access_token {
            Some(token) => {
                info!("Using the access token from configuration");
                Arc::new(StaticTokenProvider::new(token.clone()))
            }
            None => {
                info!("Using Application Default Credentials");
                Arc::new(AdcCredentialProvider::discover().await?)
            }
        };

        let warehouse = Arc::new(BigQueryRestAdapter::new(
            http.clone(),
            credentials.clone(),
            config.gcp.bigquery_endpoint.clone(),
            config.gcp.job_project(),
        ));
        let storage = Arc::new(GcsRestAdapter::new(
            http.clone(),
            credentials.clone(),
            config.gcp.storage_endpoint.clone(),
        ));

        let signer: Option<Arc<dyn BlobSigner>> = match (
            config.download.mode,
            &config.download.signer_service_account,
        ) {
            (DownloadMode::Signed, Some(account)) => {
                info!("Download links will be V4 URLs signed as {}", account);
                Some(Arc::new(IamBlobSigner::new(
                    http.clone(),
                    credentials.clone(),
                    config.gcp.iam_endpoint.clone(),
                    account.clone(),
                )))
            }
            _ => None,
        };

        let verifier: Arc<dyn TokenVerifier> = Arc::new(TokenInfoVerifier::new(
            http,
            config.gcp.tokeninfo_endpoint.clone(),
        ));

        info!(
            "Exporting from project {} (jobs run in {}) to gs://{} with up to {} concurrent exports",
            config.gcp.project,
            config.gcp.job_project(),
            config.gcp.export_bucket,
            config.export.max_concurrent_exports
        );

        let service = ExportService::new(
            config,
            warehouse,
            storage,
            Arc::new(InMemoryJobRegistry::new()),
            signer,
        )?;

        Ok(Self {
            service: Arc::new(service),
            verifier,
        })
    }
}
