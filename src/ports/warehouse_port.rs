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

//! # Warehouse Port
//!
//! The contract for talking to the data warehouse: discovering datasets and
//! tables, submitting extract jobs and reading their status back.
//!
//! The orchestrator only ever sees this trait, so tests can swap the
//! BigQuery REST adapter for a scripted fake.

use crate::domain::entities::{DatasetInfo, ExportRequest, JobState, TableInfo};
use crate::domain::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Everything needed to start one extract job.
#[derive(Debug, Clone)]
pub struct ExtractJobSpec {
    /// Client-generated id, so a retried insert cannot start a second job.
    pub job_id: String,
    pub location: Option<String>,
    pub request: ExportRequest,
    /// Remote execution limit. Unrelated to how long anyone polls.
    pub job_timeout: Option<Duration>,
}

/// A snapshot of a job as the warehouse reports it.
#[derive(Debug, Clone)]
pub struct RemoteJobStatus {
    pub job_id: String,
    pub location: Option<String>,
    pub state: JobState,
    pub error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// The extract configuration the job was started with, when the
    /// warehouse returns it. Used to rebuild a job from its id alone.
    pub request: Option<ExportRequest>,
}

#[async_trait]
pub trait WarehousePort: Send + Sync {
    /// Datasets in `project` visible to the service identity.
    async fn list_datasets(&self, project: &str) -> Result<Vec<DatasetInfo>>;

    async fn list_tables(&self, project: &str, dataset: &str) -> Result<Vec<TableInfo>>;

    /// Resolves a single table. Missing tables surface as `NotFound`.
    async fn get_table(&self, project: &str, dataset: &str, table: &str) -> Result<TableInfo>;

    /// Starts an extract job. Exactly one remote submission per call.
    async fn submit_extract(&self, spec: &ExtractJobSpec) -> Result<RemoteJobStatus>;

    async fn get_job(&self, job_id: &str, location: Option<&str>) -> Result<RemoteJobStatus>;
}
