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

//! # Export Orchestrator
//!
//! Turns an export request into a running BigQuery extract job:
//! 1. **Validation**: table reference and destination pattern are checked
//!    locally so malformed requests never reach BigQuery.
//! 2. **Admission**: at most `max_concurrent_exports` jobs are watched at
//!    once. Depending on policy an extra request is rejected or waits.
//! 3. **Submission**: the table is resolved, then one extract job is
//!    inserted under a client-generated id.
//! 4. **Watching**: a background task polls the job to a terminal state,
//!    holding the admission slot until it gets there.

use crate::application::backoff::{retry_transient, BackoffPolicy};
use crate::application::poller::JobPoller;
use crate::config::{AdmissionPolicy, AppConfig};
use crate::domain::destination::DestinationPattern;
use crate::domain::entities::{
    Compression, ExportFormat, ExportJob, ExportOptions, ExportRequest,
};
use crate::domain::errors::{ExportError, Result};
use crate::ports::job_registry_port::JobRegistry;
use crate::ports::warehouse_port::{ExtractJobSpec, WarehousePort};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

pub struct ExportOrchestrator {
    warehouse: Arc<dyn WarehousePort>,
    registry: Arc<dyn JobRegistry>,
    poller: Arc<JobPoller>,
    slots: Arc<Semaphore>,
    backoff: BackoffPolicy,
    config: AppConfig,
}

impl ExportOrchestrator {
    pub fn new(
        warehouse: Arc<dyn WarehousePort>,
        registry: Arc<dyn JobRegistry>,
        poller: Arc<JobPoller>,
        config: AppConfig,
    ) -> Self {
        Self {
            warehouse,
            registry,
            poller,
            slots: Arc::new(Semaphore::new(config.export.max_concurrent_exports)),
            backoff: BackoffPolicy::from_config(&config.export),
            config,
        }
    }

    /// Jobs currently holding an admission slot.
    pub fn in_flight(&self) -> usize {
        self.config
            .export
            .max_concurrent_exports
            .saturating_sub(self.slots.available_permits())
    }

    /// Fills in everything the caller left out from configuration. Without an
    /// explicit pattern the export lands in
    /// `gs://{bucket}/{prefix/}{YYYYMMDD_HHMMSS}/export-*.{ext}[.gz]`.
    pub fn build_request(
        &self,
        dataset: &str,
        table: &str,
        options: &ExportOptions,
    ) -> Result<ExportRequest> {
        let defaults = &self.config.export;
        let format = options.format.unwrap_or(defaults.format);
        let compression =
            Compression::from_flag(options.compression.unwrap_or(defaults.compression));

        let destination_uri_pattern = match &options.destination_uri_pattern {
            Some(pattern) => pattern.clone(),
            None => {
                let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
                DestinationPattern::default_for(
                    &self.config.gcp.export_bucket,
                    options.destination_prefix.as_deref(),
                    &timestamp,
                    format,
                    compression,
                )
                .to_string()
            }
        };

        Ok(ExportRequest {
            project: self.config.gcp.project.clone(),
            dataset: dataset.trim().to_string(),
            table: table.trim().to_string(),
            destination_uri_pattern,
            format,
            compression,
            print_header: options.print_header.unwrap_or(defaults.print_header),
            field_delimiter: options
                .field_delimiter
                .clone()
                .unwrap_or_else(|| defaults.field_delimiter.clone()),
        })
    }

    /// Validates, admits and submits `request`. Returns as soon as BigQuery
    /// has accepted the job; completion is tracked in the background.
    pub async fn submit(&self, request: ExportRequest) -> Result<ExportJob> {
        validate_request(&request)?;
        let permit = self.admit().await?;

        let table_ref = request.table_ref();
        let lookup = retry_transient(self.backoff, self.config.export.max_retries, "tables.get", || {
            self.warehouse
                .get_table(&request.project, &request.dataset, &request.table)
        })
        .await;
        match lookup {
            Ok(_) => {}
            Err(ExportError::NotFound(_)) => {
                return Err(ExportError::InvalidRequest(format!(
                    "Table not found: {}",
                    table_ref
                )))
            }
            Err(e) => return Err(e),
        }

        let spec = ExtractJobSpec {
            job_id: new_job_id(),
            location: self.config.gcp.location.clone(),
            request,
            job_timeout: self.config.export.job_timeout(),
        };
        let remote = retry_transient(self.backoff, self.config.export.max_retries, "jobs.insert", || {
            self.warehouse.submit_extract(&spec)
        })
        .await?;

        let ExtractJobSpec {
            job_id,
            location,
            request,
            ..
        } = spec;
        let mut job = ExportJob::new(job_id, remote.location.or(location), request);
        job.observe(remote.state, remote.error);
        let job = self.registry.record(job);

        info!(
            "Submitted export job {} for {} -> {}",
            job.job_id, table_ref, job.request.destination_uri_pattern
        );
        self.spawn_watcher(job.job_id.clone(), permit);
        Ok(job)
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit> {
        let limit = self.config.export.max_concurrent_exports;
        match self.config.export.admission {
            AdmissionPolicy::Reject => Arc::clone(&self.slots).try_acquire_owned().map_err(|_| {
                warn!("Rejecting export: {} exports already running", limit);
                ExportError::AdmissionRejected { limit }
            }),
            AdmissionPolicy::Queue => {
                if self.slots.available_permits() == 0 {
                    info!("All {} export slots busy, waiting", limit);
                }
                Arc::clone(&self.slots)
                    .acquire_owned()
                    .await
                    .map_err(|_| ExportError::ServiceError("Admission queue closed".to_string()))
            }
        }
    }

    fn spawn_watcher(&self, job_id: String, permit: OwnedSemaphorePermit) {
        let poller = Arc::clone(&self.poller);
        let timeout = self.config.export.poll_timeout();
        tokio::spawn(async move {
            let _slot = permit;
            match poller.wait_for_terminal(&job_id, timeout).await {
                Ok(job) => info!("Export job {} succeeded", job.job_id),
                Err(ExportError::JobFailed { message, .. }) => {
                    error!("Export job {} failed: {}", job_id, message)
                }
                Err(e @ ExportError::Timeout { .. }) => warn!("{}", e),
                Err(e) => error!("Lost track of export job {}: {}", job_id, e),
            }
        });
    }
}

fn new_job_id() -> String {
    format!("bq_export_{}", Uuid::new_v4().simple())
}

fn is_valid_id(value: &str, extra: &[char]) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || extra.contains(&c))
}

/// Local checks that need no remote call.
pub fn validate_request(request: &ExportRequest) -> Result<()> {
    let invalid = |msg: String| Err(ExportError::InvalidRequest(msg));

    if !is_valid_id(&request.project, &['-', '.', ':']) {
        return invalid(format!("Invalid project id: '{}'", request.project));
    }
    if !is_valid_id(&request.dataset, &[]) {
        return invalid(format!("Invalid dataset id: '{}'", request.dataset));
    }
    // '$' is allowed for partition decorators such as orders$20240101.
    if !is_valid_id(&request.table, &['-', '$']) {
        return invalid(format!("Invalid table id: '{}'", request.table));
    }
    DestinationPattern::parse(&request.destination_uri_pattern)?;

    if request.format == ExportFormat::Csv && request.field_delimiter.is_empty() {
        return invalid("Field delimiter must not be empty".to_string());
    }
    if request.format == ExportFormat::Avro && request.compression.is_gzip() {
        return invalid("GZIP compression is not supported for AVRO exports".to_string());
    }
    Ok(())
}
