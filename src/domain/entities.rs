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

//! # Domain Entities
//!
//! The nouns of the exporter: export requests, the jobs BigQuery runs for
//! them, the shards those jobs leave in Cloud Storage, and the artifacts we
//! hand back to callers.
//!
//! Everything here is plain data with `serde` derives so it can travel over
//! the HTTP API unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Destination file format, named the way BigQuery names it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportFormat {
    #[default]
    Csv,
    NewlineDelimitedJson,
    Avro,
    Parquet,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::NewlineDelimitedJson => "json",
            ExportFormat::Avro => "avro",
            ExportFormat::Parquet => "parquet",
        }
    }

    /// Line-oriented formats can be concatenated; container formats cannot.
    pub fn is_mergeable(&self) -> bool {
        matches!(self, ExportFormat::Csv | ExportFormat::NewlineDelimitedJson)
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::NewlineDelimitedJson => "application/x-ndjson",
            ExportFormat::Avro | ExportFormat::Parquet => "application/octet-stream",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "CSV"),
            ExportFormat::NewlineDelimitedJson => write!(f, "NEWLINE_DELIMITED_JSON"),
            ExportFormat::Avro => write!(f, "AVRO"),
            ExportFormat::Parquet => write!(f, "PARQUET"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            Compression::Gzip
        } else {
            Compression::None
        }
    }

    pub fn is_gzip(&self) -> bool {
        *self == Compression::Gzip
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "NONE"),
            Compression::Gzip => write!(f, "GZIP"),
        }
    }
}

/// A fully-resolved export request. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub project: String,
    pub dataset: String,
    pub table: String,
    pub destination_uri_pattern: String,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub compression: Compression,
    pub print_header: bool,
    pub field_delimiter: String,
}

impl ExportRequest {
    /// `project.dataset.table`, as BigQuery prints it.
    pub fn table_ref(&self) -> String {
        format!("{}.{}.{}", self.project, self.dataset, self.table)
    }

    /// Whether every shard starts with a header row.
    pub fn has_header_rows(&self) -> bool {
        self.format == ExportFormat::Csv && self.print_header
    }
}

/// Caller-facing knobs for `POST /api/v1/export`. Anything left out falls
/// back to the service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub compression: Option<bool>,
    pub destination_prefix: Option<String>,
    pub destination_uri_pattern: Option<String>,
    pub format: Option<ExportFormat>,
    pub print_header: Option<bool>,
    pub field_delimiter: Option<String>,
}

/// Lifecycle of a BigQuery extract job.
///
/// `PENDING -> RUNNING -> {SUCCEEDED | FAILED}`; terminal states are final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Running => 1,
            JobState::Succeeded | JobState::Failed => 2,
        }
    }

    /// The state after observing `next`. A terminal state never changes and
    /// a stale observation (RUNNING after RUNNING was already seen, PENDING
    /// after RUNNING) never moves the job backwards.
    pub fn advance(self, next: JobState) -> JobState {
        if self.is_terminal() || next.rank() < self.rank() {
            self
        } else {
            next
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "PENDING"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Succeeded => write!(f, "SUCCEEDED"),
            JobState::Failed => write!(f, "FAILED"),
        }
    }
}

/// An export job as tracked by this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub job_id: String,
    pub location: Option<String>,
    pub request: ExportRequest,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl ExportJob {
    pub fn new(job_id: String, location: Option<String>, request: ExportRequest) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            location,
            request,
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Folds an observed remote state into this job. Returns true when the
    /// job changed.
    pub fn observe(&mut self, state: JobState, error: Option<String>) -> bool {
        let next = self.state.advance(state);
        if next == self.state {
            return false;
        }
        self.state = next;
        if next == JobState::Failed {
            self.error = Some(error.unwrap_or_else(|| "Unknown error".to_string()));
        }
        self.updated_at = Utc::now();
        true
    }
}

/// One object written by an export job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputShard {
    pub uri: String,
    pub bucket: String,
    pub name: String,
    pub size_bytes: u64,
    pub sequence_index: u64,
}

/// What a finished export offers for download: one merged object, or the
/// raw shards when merging was skipped or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadArtifact {
    Merged { uri: String, size_bytes: u64 },
    Shards { shards: Vec<OutputShard> },
}

/// A URL for one object of a `DownloadArtifact`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLink {
    pub uri: String,
    pub url: String,
    pub size_bytes: u64,
    /// `None` for authenticated (identity-based) URLs, which do not expire.
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub merged_uri: String,
    pub total_size_bytes: u64,
    pub rows_written: u64,
    pub headers_skipped: u64,
    pub source_files: usize,
    pub source_files_deleted: bool,
    pub compressed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    pub friendly_name: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub table_type: String,
    pub num_rows: Option<u64>,
    pub size_bytes: Option<u64>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}
