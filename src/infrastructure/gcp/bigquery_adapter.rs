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

//! # BigQuery REST Adapter
//!
//! Implements `WarehousePort` on top of the BigQuery v2 REST API:
//! `datasets.list`, `tables.list`, `tables.get`, `jobs.insert` and `jobs.get`.
//!
//! The adapter makes exactly one HTTP call per port method (plus pagination)
//! and never retries; retry policy belongs to the application layer.

use crate::domain::entities::{
    Compression, DatasetInfo, ExportFormat, ExportRequest, JobState, TableInfo,
};
use crate::domain::errors::{ExportError, Result};
use crate::infrastructure::gcp::http::{endpoint_url, error_from_response, parse_millis, send_json};
use crate::ports::credential_port::CredentialProvider;
use crate::ports::warehouse_port::{ExtractJobSpec, RemoteJobStatus, WarehousePort};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Concurrent `tables.get` calls while listing a dataset.
const TABLE_LOOKUP_CONCURRENCY: usize = 8;

pub struct BigQueryRestAdapter {
    http: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    endpoint: String,
    /// Project that owns (and pays for) the extract jobs.
    job_project: String,
}

// --- Wire types (only the fields we read) ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetList {
    #[serde(default)]
    datasets: Vec<DatasetListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetListItem {
    dataset_reference: DatasetReference,
    friendly_name: Option<String>,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    dataset_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListItem {
    table_reference: TableReference,
    #[serde(rename = "type")]
    table_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    project_id: Option<String>,
    dataset_id: Option<String>,
    table_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    table_reference: TableReference,
    #[serde(rename = "type")]
    table_type: Option<String>,
    num_rows: Option<String>,
    num_bytes: Option<String>,
    creation_time: Option<String>,
    last_modified_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    #[serde(default)]
    configuration: JobConfiguration,
    #[serde(default)]
    status: JobStatusBody,
    #[serde(default)]
    statistics: JobStatistics,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobConfiguration {
    extract: Option<ExtractConfiguration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractConfiguration {
    source_table: Option<TableReference>,
    #[serde(default)]
    destination_uris: Vec<String>,
    destination_format: Option<ExportFormat>,
    compression: Option<String>,
    print_header: Option<bool>,
    field_delimiter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusBody {
    state: Option<String>,
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatistics {
    creation_time: Option<String>,
}

impl BigQueryRestAdapter {
    pub fn new(
        http: reqwest::Client,
        credentials: Arc<dyn CredentialProvider>,
        endpoint: impl Into<String>,
        job_project: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            endpoint: endpoint.into(),
            job_project: job_project.into(),
        }
    }

    async fn get(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<reqwest::RequestBuilder> {
        let url = endpoint_url(&self.endpoint, segments)?;
        let token = self.credentials.access_token().await?;
        Ok(self.http.get(url).bearer_auth(token).query(query))
    }

    fn table_info(resource: TableResource) -> TableInfo {
        TableInfo {
            id: resource.table_reference.table_id,
            table_type: resource.table_type.unwrap_or_else(|| "TABLE".to_string()),
            num_rows: resource.num_rows.and_then(|v| v.parse().ok()),
            size_bytes: resource.num_bytes.and_then(|v| v.parse().ok()),
            created: parse_millis(resource.creation_time.as_deref()),
            modified: parse_millis(resource.last_modified_time.as_deref()),
        }
    }

    fn extract_body(&self, spec: &ExtractJobSpec) -> Value {
        let request = &spec.request;
        let mut extract = json!({
            "sourceTable": {
                "projectId": request.project,
                "datasetId": request.dataset,
                "tableId": request.table,
            },
            "destinationUris": [request.destination_uri_pattern],
            "destinationFormat": request.format.to_string(),
            "compression": request.compression.to_string(),
        });
        if request.format == ExportFormat::Csv {
            extract["printHeader"] = json!(request.print_header);
            extract["fieldDelimiter"] = json!(request.field_delimiter);
        }

        let mut configuration = json!({ "extract": extract });
        if let Some(timeout) = spec.job_timeout {
            // int64 fields travel as strings in the BigQuery JSON API.
            configuration["jobTimeoutMs"] = json!(timeout.as_millis().to_string());
        }

        let mut job_reference = json!({
            "projectId": self.job_project,
            "jobId": spec.job_id,
        });
        if let Some(location) = &spec.location {
            job_reference["location"] = json!(location);
        }

        json!({
            "jobReference": job_reference,
            "configuration": configuration,
        })
    }

    fn job_status(job: JobResource) -> RemoteJobStatus {
        let (state, error) = match (job.status.state.as_deref(), job.status.error_result) {
            (Some("DONE"), Some(err)) => (
                JobState::Failed,
                Some(
                    err.message
                        .or(err.reason)
                        .unwrap_or_else(|| "Unknown error".to_string()),
                ),
            ),
            (Some("DONE"), None) => (JobState::Succeeded, None),
            (Some("RUNNING"), _) => (JobState::Running, None),
            _ => (JobState::Pending, None),
        };

        let request = job.configuration.extract.and_then(|extract| {
            let source = extract.source_table?;
            let destination = extract.destination_uris.into_iter().next()?;
            let format = extract.destination_format.unwrap_or_default();
            Some(ExportRequest {
                project: source.project_id.unwrap_or_default(),
                dataset: source.dataset_id.unwrap_or_default(),
                table: source.table_id,
                destination_uri_pattern: destination,
                format,
                compression: Compression::from_flag(extract.compression.as_deref() == Some("GZIP")),
                print_header: extract.print_header.unwrap_or(format == ExportFormat::Csv),
                field_delimiter: extract.field_delimiter.unwrap_or_else(|| ",".to_string()),
            })
        });

        RemoteJobStatus {
            job_id: job.job_reference.job_id,
            location: job.job_reference.location,
            state,
            error,
            created_at: parse_millis(job.statistics.creation_time.as_deref()),
            request,
        }
    }
}

#[async_trait]
impl WarehousePort for BigQueryRestAdapter {
    async fn list_datasets(&self, project: &str) -> Result<Vec<DatasetInfo>> {
        let mut datasets = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![];
            if let Some(t) = page_token.as_deref() {
                query.push(("pageToken", t));
            }
            let request = self.get(&["projects", project, "datasets"], &query).await?;
            let page: DatasetList = send_json(request).await?;

            datasets.extend(page.datasets.into_iter().map(|d| DatasetInfo {
                friendly_name: d
                    .friendly_name
                    .unwrap_or_else(|| d.dataset_reference.dataset_id.clone()),
                id: d.dataset_reference.dataset_id,
                location: d.location,
            }));

            match page.next_page_token {
                Some(t) if !t.is_empty() => page_token = Some(t),
                _ => break,
            }
        }
        Ok(datasets)
    }

    async fn list_tables(&self, project: &str, dataset: &str) -> Result<Vec<TableInfo>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![];
            if let Some(t) = page_token.as_deref() {
                query.push(("pageToken", t));
            }
            let request = self
                .get(&["projects", project, "datasets", dataset, "tables"], &query)
                .await?;
            let page: TableList = send_json(request).await.map_err(|e| match e {
                ExportError::NotFound(_) => {
                    ExportError::NotFound(format!("Dataset not found: {}", dataset))
                }
                other => other,
            })?;
            items.extend(page.tables);

            match page.next_page_token {
                Some(t) if !t.is_empty() => page_token = Some(t),
                _ => break,
            }
        }

        // tables.list omits row counts and sizes, so fetch each table. A table
        // we cannot read still shows up, just without details.
        let lookups: Vec<_> = items
            .iter()
            .map(|item| self.get_table(project, dataset, &item.table_reference.table_id))
            .collect();
        let details: Vec<_> = stream::iter(lookups)
        .buffered(TABLE_LOOKUP_CONCURRENCY)
        .collect()
        .await;

        Ok(items
            .into_iter()
            .zip(details)
            .map(|(item, detail)| match detail {
                Ok(info) => info,
                Err(e) => {
                    warn!(
                        "Could not read metadata for {}.{}: {}",
                        dataset, item.table_reference.table_id, e
                    );
                    TableInfo {
                        id: item.table_reference.table_id,
                        table_type: item.table_type.unwrap_or_else(|| "UNKNOWN".to_string()),
                        num_rows: None,
                        size_bytes: None,
                        created: None,
                        modified: None,
                    }
                }
            })
            .collect())
    }

    async fn get_table(&self, project: &str, dataset: &str, table: &str) -> Result<TableInfo> {
        let request = self
            .get(&["projects", project, "datasets", dataset, "tables", table], &[])
            .await?;
        let resource: TableResource = send_json(request).await?;
        Ok(Self::table_info(resource))
    }

    async fn submit_extract(&self, spec: &ExtractJobSpec) -> Result<RemoteJobStatus> {
        let url = endpoint_url(&self.endpoint, &["projects", &self.job_project, "jobs"])?;
        let token = self.credentials.access_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&self.extract_body(spec))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 409 {
            // The job id already exists: an earlier attempt reached BigQuery
            // even though we never saw the response.
            info!("Extract job {} already exists, reading it back", spec.job_id);
            return self.get_job(&spec.job_id, spec.location.as_deref()).await;
        }
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let job: JobResource = serde_json::from_slice(&response.bytes().await?)?;
        info!(
            "Submitted extract job {} for {}",
            job.job_reference.job_id,
            spec.request.table_ref()
        );
        Ok(Self::job_status(job))
    }

    async fn get_job(&self, job_id: &str, location: Option<&str>) -> Result<RemoteJobStatus> {
        let mut query = vec![];
        if let Some(l) = location {
            query.push(("location", l));
        }
        let request = self
            .get(&["projects", &self.job_project, "jobs", job_id], &query)
            .await?;
        let job: JobResource = send_json(request).await?;
        Ok(Self::job_status(job))
    }
}
