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

//! # Export Service
//!
//! The single entry point used by both the HTTP API and the CLI. It wires the
//! orchestrator, poller, shard collector and URL issuer together and owns
//! the download flow: a finished job's shards are optionally merged, and
//! links are issued for whatever artifact results.

use crate::application::backoff::BackoffPolicy;
use crate::application::download::DownloadUrlIssuer;
use crate::application::orchestrator::ExportOrchestrator;
use crate::application::poller::JobPoller;
use crate::application::shard_collector::{MergeOptions, ShardCollector};
use crate::config::{AppConfig, DownloadMode};
use crate::domain::destination::{DestinationPattern, GcsUri};
use crate::domain::entities::{
    DatasetInfo, DownloadArtifact, DownloadLink, ExportFormat, ExportJob, ExportOptions,
    JobState, MergeResult, TableInfo,
};
use crate::domain::errors::{ExportError, Result};
use crate::ports::credential_port::BlobSigner;
use crate::ports::job_registry_port::JobRegistry;
use crate::ports::storage_port::StoragePort;
use crate::ports::warehouse_port::WarehousePort;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Wildcard replacement used for the merged object of an export.
const MERGED_NAME: &str = "merged";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    pub merge: Option<bool>,
    pub delete_source_files: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResponse {
    pub job_id: String,
    pub artifact: DownloadArtifact,
    pub links: Vec<DownloadLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeResult>,
    /// Set when a merge was attempted and failed; the shards are served instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_error: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A merge of everything under a prefix of the export bucket, independent
/// of any job.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeRequest {
    pub source_prefix: String,
    pub destination_filename: String,
    #[serde(default = "default_true")]
    pub delete_source_files: bool,
    #[serde(default = "default_true")]
    pub compress_output: bool,
}

pub struct ExportService {
    config: AppConfig,
    warehouse: Arc<dyn WarehousePort>,
    orchestrator: ExportOrchestrator,
    poller: Arc<JobPoller>,
    collector: ShardCollector,
    issuer: DownloadUrlIssuer,
}

impl ExportService {
    /// `signer` is required when downloads are configured as signed URLs.
    pub fn new(
        config: AppConfig,
        warehouse: Arc<dyn WarehousePort>,
        storage: Arc<dyn StoragePort>,
        registry: Arc<dyn JobRegistry>,
        signer: Option<Arc<dyn BlobSigner>>,
    ) -> Result<Self> {
        let backoff = BackoffPolicy::from_config(&config.export);
        let max_retries = config.export.max_retries;

        let poller = Arc::new(
            JobPoller::new(warehouse.clone(), registry.clone(), backoff, max_retries)
                .with_default_location(config.gcp.location.clone()),
        );
        let orchestrator =
            ExportOrchestrator::new(warehouse.clone(), registry, poller.clone(), config.clone());
        let collector = ShardCollector::new(storage, backoff, max_retries);
        let issuer = match (config.download.mode, signer) {
            (DownloadMode::Authenticated, _) => DownloadUrlIssuer::authenticated(),
            (DownloadMode::Signed, Some(signer)) => {
                DownloadUrlIssuer::signed(signer, config.download.url_expiry_secs)
            }
            (DownloadMode::Signed, None) => {
                return Err(ExportError::ConfigError(
                    "Signed downloads need a signing service account".to_string(),
                ))
            }
        };
        if !issuer.is_signed() {
            info!("Download links rely on the caller's own Cloud Storage access");
        }

        Ok(Self {
            config,
            warehouse,
            orchestrator,
            poller,
            collector,
            issuer,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn list_datasets(&self) -> Result<Vec<DatasetInfo>> {
        self.warehouse.list_datasets(&self.config.gcp.project).await
    }

    pub async fn list_tables(&self, dataset: &str) -> Result<Vec<TableInfo>> {
        if dataset.trim().is_empty() {
            return Err(ExportError::InvalidRequest(
                "Dataset ID is required".to_string(),
            ));
        }
        self.warehouse
            .list_tables(&self.config.gcp.project, dataset.trim())
            .await
    }

    pub async fn start_export(
        &self,
        dataset: &str,
        table: &str,
        options: &ExportOptions,
    ) -> Result<ExportJob> {
        let request = self.orchestrator.build_request(dataset, table, options)?;
        self.orchestrator.submit(request).await
    }

    pub async fn status(&self, job_id: &str) -> Result<ExportJob> {
        self.poller.poll(job_id).await
    }

    /// Blocks until the job is terminal. `timeout` defaults to the configured
    /// poll timeout.
    pub async fn wait(&self, job_id: &str, timeout: Option<Duration>) -> Result<ExportJob> {
        let timeout = timeout.unwrap_or_else(|| self.config.export.poll_timeout());
        self.poller.wait_for_terminal(job_id, timeout).await
    }

    pub async fn download(&self, job_id: &str, options: &DownloadOptions) -> Result<DownloadResponse> {
        let job = self.poller.poll(job_id).await?;
        match job.state {
            JobState::Succeeded => {}
            JobState::Failed => {
                return Err(ExportError::JobFailed {
                    job_id: job.job_id,
                    message: job.error.unwrap_or_else(|| "Unknown error".to_string()),
                })
            }
            JobState::Pending | JobState::Running => {
                return Err(ExportError::JobNotReady {
                    job_id: job.job_id,
                    state: job.state.to_string(),
                })
            }
        }

        let request = &job.request;
        let pattern = DestinationPattern::parse(&request.destination_uri_pattern)?;
        let merged_uri = pattern.with_wildcard(MERGED_NAME);
        let want_merge = options.merge.unwrap_or(false) && request.format.is_mergeable();

        if want_merge {
            if let Some(existing) = self.collector.find(&merged_uri).await? {
                return self.respond(job_id, merged_artifact(existing.uri, existing.size_bytes), None, None).await;
            }
        }

        let shards = match self.collector.collect(&pattern).await {
            Ok(shards) => shards,
            // Shards already merged away by an earlier download.
            Err(ExportError::NoShardsFound(p)) => match self.collector.find(&merged_uri).await? {
                Some(existing) => {
                    return self
                        .respond(job_id, merged_artifact(existing.uri, existing.size_bytes), None, None)
                        .await
                }
                None => return Err(ExportError::NoShardsFound(p)),
            },
            Err(e) => return Err(e),
        };

        if shards.len() == 1 {
            let only = &shards[0];
            return self
                .respond(job_id, merged_artifact(only.uri.clone(), only.size_bytes), None, None)
                .await;
        }
        if !want_merge {
            return self
                .respond(job_id, DownloadArtifact::Shards { shards }, None, None)
                .await;
        }

        let merge_options = MergeOptions {
            format: request.format,
            skip_headers: request.has_header_rows(),
            compress_output: request.compression.is_gzip(),
            delete_source_files: options
                .delete_source_files
                .unwrap_or(self.config.export.delete_source_files),
        };
        match self.collector.merge(&shards, &merged_uri, &merge_options).await {
            Ok(result) => {
                let artifact = merged_artifact(result.merged_uri.clone(), result.total_size_bytes);
                self.respond(job_id, artifact, Some(result), None).await
            }
            Err(e) => {
                warn!(
                    "Merge for job {} failed, serving {} shard(s) instead: {}",
                    job_id,
                    shards.len(),
                    e
                );
                self.respond(
                    job_id,
                    DownloadArtifact::Shards { shards },
                    None,
                    Some(e.to_string()),
                )
                .await
            }
        }
    }

    /// A link for a single object in the export bucket.
    pub async fn object_link(&self, object: &str) -> Result<DownloadLink> {
        let object = object.trim_start_matches('/');
        if object.is_empty() {
            return Err(ExportError::InvalidRequest(
                "Object name is required".to_string(),
            ));
        }
        let uri = GcsUri::new(self.config.gcp.export_bucket.as_str(), object);
        let found = self
            .collector
            .find(&uri)
            .await?
            .ok_or_else(|| ExportError::NotFound(format!("Object not found: {}", uri)))?;

        let artifact = merged_artifact(found.uri, found.size_bytes);
        self.issuer
            .issue(&artifact)
            .await?
            .pop()
            .ok_or_else(|| ExportError::ServiceError(format!("No link issued for {}", uri)))
    }

    /// Merges every object under `source_prefix` into one file.
    pub async fn merge(&self, request: &MergeRequest) -> Result<MergeResult> {
        if request.source_prefix.trim().is_empty() {
            return Err(ExportError::InvalidRequest(
                "source_prefix is required".to_string(),
            ));
        }
        if request.destination_filename.trim().is_empty() {
            return Err(ExportError::InvalidRequest(
                "destination_filename is required".to_string(),
            ));
        }

        let bucket = &self.config.gcp.export_bucket;
        let plain_name = request.destination_filename.trim_end_matches(".gz");
        let format = if plain_name.ends_with(".json") {
            ExportFormat::NewlineDelimitedJson
        } else {
            ExportFormat::Csv
        };
        let options = MergeOptions {
            format,
            skip_headers: format == ExportFormat::Csv,
            compress_output: request.compress_output,
            delete_source_files: request.delete_source_files,
        };

        info!(
            "Merging gs://{}/{}* into {}",
            bucket, request.source_prefix, request.destination_filename
        );
        self.collector
            .merge_prefix(
                bucket,
                &request.source_prefix,
                &request.destination_filename,
                &options,
            )
            .await
    }

    async fn respond(
        &self,
        job_id: &str,
        artifact: DownloadArtifact,
        merge: Option<MergeResult>,
        merge_error: Option<String>,
    ) -> Result<DownloadResponse> {
        let links = self.issuer.issue(&artifact).await?;
        Ok(DownloadResponse {
            job_id: job_id.to_string(),
            artifact,
            links,
            merge,
            merge_error,
        })
    }
}

fn merged_artifact(uri: String, size_bytes: u64) -> DownloadArtifact {
    DownloadArtifact::Merged { uri, size_bytes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{csv_request, FakeStorage, FakeWarehouse};
    use crate::infrastructure::memory::job_registry::InMemoryJobRegistry;
    use flate2::read::MultiGzDecoder;
    use flate2::write::GzEncoder;
    use std::io::{Read, Write};
    use std::sync::atomic::Ordering;

    const PATTERN: &str = "gs://exports/run/export-*.csv";

    struct Fixture {
        warehouse: Arc<FakeWarehouse>,
        storage: Arc<FakeStorage>,
        service: ExportService,
    }

    fn fixture() -> Fixture {
        let mut config = AppConfig::default();
        config.gcp.project = "proj".into();
        config.gcp.export_bucket = "exports".into();

        let warehouse = Arc::new(FakeWarehouse::with_table("sales", "orders"));
        let storage = Arc::new(FakeStorage::default());
        let service = ExportService::new(
            config,
            warehouse.clone(),
            storage.clone(),
            Arc::new(InMemoryJobRegistry::new()),
            None,
        )
        .unwrap();
        Fixture {
            warehouse,
            storage,
            service,
        }
    }

    fn finished_job(f: &Fixture, id: &str, shards: usize) {
        f.warehouse
            .remote_jobs
            .lock()
            .unwrap()
            .insert(id.to_string(), csv_request(PATTERN));
        f.warehouse.script(&[(JobState::Succeeded, None)]);
        for i in 0..shards {
            f.storage.put(
                "exports",
                &format!("run/export-{:012}.csv", i),
                format!("id\n{}\n", i),
            );
        }
    }

    #[tokio::test]
    async fn test_download_requires_success() {
        let f = fixture();
        f.warehouse
            .remote_jobs
            .lock()
            .unwrap()
            .insert("job_running".into(), csv_request(PATTERN));
        f.warehouse.script(&[(JobState::Running, None)]);

        let err = f
            .service
            .download("job_running", &DownloadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::JobNotReady { .. }));
    }

    #[tokio::test]
    async fn test_download_of_failed_job_surfaces_remote_error() {
        let f = fixture();
        f.warehouse
            .remote_jobs
            .lock()
            .unwrap()
            .insert("job_failed".into(), csv_request(PATTERN));
        f.warehouse.script(&[(JobState::Failed, Some("Access Denied: bucket"))]);

        let err = f
            .service
            .download("job_failed", &DownloadOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Access Denied: bucket");
    }

    #[tokio::test]
    async fn test_download_without_merge_lists_shards() {
        let f = fixture();
        finished_job(&f, "job_1", 3);

        let response = f
            .service
            .download("job_1", &DownloadOptions::default())
            .await
            .unwrap();
        assert_eq!(response.links.len(), 3);
        assert!(matches!(response.artifact, DownloadArtifact::Shards { .. }));
        assert!(response.merge.is_none());
    }

    #[tokio::test]
    async fn test_download_with_merge_is_repeatable() {
        let f = fixture();
        finished_job(&f, "job_2", 4);
        let options = DownloadOptions {
            merge: Some(true),
            delete_source_files: None,
        };

        let first = f.service.download("job_2", &options).await.unwrap();
        let merge = first.merge.unwrap();
        assert_eq!(merge.merged_uri, "gs://exports/run/export-merged.csv");
        assert_eq!(merge.headers_skipped, 3);
        assert!(merge.source_files_deleted);
        assert_eq!(first.links.len(), 1);

        // Shards are gone now; the merged object is served as is.
        let second = f.service.download("job_2", &options).await.unwrap();
        assert!(second.merge.is_none());
        assert!(matches!(
            second.artifact,
            DownloadArtifact::Merged { ref uri, .. } if uri == "gs://exports/run/export-merged.csv"
        ));
        let second_plain = f
            .service
            .download("job_2", &DownloadOptions::default())
            .await
            .unwrap();
        assert_eq!(second_plain.links.len(), 1);
    }

    #[tokio::test]
    async fn test_merge_failure_falls_back_to_shards() {
        let f = fixture();
        finished_job(&f, "job_3", 2);
        f.storage.fail_uploads.store(true, Ordering::SeqCst);

        let response = f
            .service
            .download(
                "job_3",
                &DownloadOptions {
                    merge: Some(true),
                    delete_source_files: Some(true),
                },
            )
            .await
            .unwrap();

        assert!(response.merge_error.is_some());
        assert_eq!(response.links.len(), 2);
        assert!(f.storage.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_succeeded_job_without_output_is_an_inconsistency() {
        let f = fixture();
        finished_job(&f, "job_empty", 0);

        let err = f
            .service
            .download("job_empty", &DownloadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::NoShardsFound(_)));
    }

    #[tokio::test]
    async fn test_list_tables_requires_dataset() {
        let f = fixture();
        let err = f.service.list_tables("  ").await.unwrap_err();
        assert!(matches!(err, ExportError::InvalidRequest(_)));
        assert_eq!(f.service.list_tables("sales").await.unwrap()[0].id, "orders");
    }

    #[tokio::test]
    async fn test_standalone_merge_uses_export_bucket() {
        let f = fixture();
        f.storage.put("exports", "manual/a-1.csv", "h\n1\n");
        f.storage.put("exports", "manual/a-2.csv", "h\n2\n");
        let request: MergeRequest = serde_json::from_value(serde_json::json!({
            "source_prefix": "manual/",
            "destination_filename": "manual/all.csv"
        }))
        .unwrap();

        let result = f.service.merge(&request).await.unwrap();
        assert_eq!(result.merged_uri, "gs://exports/manual/all.csv.gz");
        assert!(result.compressed);
        assert!(result.source_files_deleted);
        assert_eq!(f.storage.names(), vec!["manual/all.csv.gz".to_string()]);
    }

    #[tokio::test]
    async fn test_standalone_merge_of_compressed_export() {
        let f = fixture();
        for (i, body) in ["id\n1\n", "id\n2\n"].iter().enumerate() {
            let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(body.as_bytes()).unwrap();
            f.storage.put(
                "exports",
                &format!("run/export-{:012}.csv.gz", i),
                enc.finish().unwrap(),
            );
        }
        let request: MergeRequest = serde_json::from_value(serde_json::json!({
            "source_prefix": "run/",
            "destination_filename": "run/all.csv"
        }))
        .unwrap();

        let result = f.service.merge(&request).await.unwrap();
        assert_eq!(result.merged_uri, "gs://exports/run/all.csv.gz");
        assert_eq!(f.storage.names(), vec!["run/all.csv.gz".to_string()]);

        let mut merged = String::new();
        MultiGzDecoder::new(&f.storage.get("exports", "run/all.csv.gz").unwrap()[..])
            .read_to_string(&mut merged)
            .unwrap();
        assert_eq!(merged, "id\n1\n2\n");
    }

    #[test]
    fn test_merge_request_has_no_bucket_field() {
        let parsed = serde_json::from_value::<MergeRequest>(serde_json::json!({
            "source_prefix": "run/",
            "destination_filename": "run/all.csv",
            "bucket": "someone-elses-bucket"
        }));
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_object_link_for_existing_object() {
        let f = fixture();
        f.storage.put("exports", "reports/q1.csv", "id\n1\n");

        let link = f.service.object_link("/reports/q1.csv").await.unwrap();
        assert_eq!(link.url, "https://storage.cloud.google.com/exports/reports/q1.csv");
        assert_eq!(link.size_bytes, 5);

        let err = f.service.object_link("reports/q2.csv").await.unwrap_err();
        assert!(matches!(err, ExportError::NotFound(_)));
    }

    #[test]
    fn test_signed_mode_needs_a_signer() {
        let mut config = AppConfig::default();
        config.download.mode = DownloadMode::Signed;
        let result = ExportService::new(
            config,
            Arc::new(FakeWarehouse::default()),
            Arc::new(FakeStorage::default()),
            Arc::new(InMemoryJobRegistry::new()),
            None,
        );
        assert!(matches!(result, Err(ExportError::ConfigError(_))));
    }
}
