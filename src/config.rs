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

//! # Configuration
//!
//! Settings are layered: a YAML (or JSON) file, then environment variables
//! (the names Cloud Run deployments already use), then command-line flags.
//! `validate()` runs last and rejects anything the workflow cannot honour.

use crate::domain::entities::ExportFormat;
use crate::domain::errors::{ExportError, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::str::FromStr;
use std::time::Duration;

/// Longest lifetime Cloud Storage accepts for a V4 signed URL.
pub const MAX_SIGNED_URL_EXPIRY_SECS: u64 = 604_800;
/// Longest a caller may watch one export: 30 days.
pub const MAX_POLL_TIMEOUT_SECS: u64 = 2_592_000;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub gcp: GcpConfig,
    pub export: ExportConfig,
    pub download: DownloadConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GcpConfig {
    /// Project whose datasets are exported.
    pub project: String,
    pub export_bucket: String,
    /// Project billed for the extract jobs. Defaults to `project`.
    pub job_project: Option<String>,
    pub location: Option<String>,
    pub bigquery_endpoint: String,
    pub storage_endpoint: String,
    pub iam_endpoint: String,
    pub tokeninfo_endpoint: String,
    /// Fixed bearer token. When unset, Application Default Credentials are used.
    pub access_token: Option<String>,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            export_bucket: String::new(),
            job_project: None,
            location: None,
            bigquery_endpoint: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
            storage_endpoint: "https://storage.googleapis.com".to_string(),
            iam_endpoint: "https://iamcredentials.googleapis.com/v1".to_string(),
            tokeninfo_endpoint: "https://www.googleapis.com/oauth2/v1/tokeninfo".to_string(),
            access_token: None,
        }
    }
}

impl GcpConfig {
    pub fn job_project(&self) -> &str {
        self.job_project.as_deref().unwrap_or(&self.project)
    }
}

/// What to do with a submission once `max_concurrent_exports` jobs are in flight.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionPolicy {
    #[default]
    Reject,
    Queue,
}

impl FromStr for AdmissionPolicy {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(AdmissionPolicy::Reject),
            "queue" => Ok(AdmissionPolicy::Queue),
            other => Err(ExportError::ConfigError(format!(
                "Unknown admission policy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportConfig {
    pub compression: bool,
    pub delete_source_files: bool,
    pub max_concurrent_exports: usize,
    pub admission: AdmissionPolicy,
    pub format: ExportFormat,
    pub print_header: bool,
    pub field_delimiter: String,
    pub poll_initial_backoff_ms: u64,
    pub poll_max_backoff_ms: u64,
    pub poll_multiplier: f64,
    /// How long we keep watching a job. The job itself is not bounded by this.
    pub poll_timeout_secs: u64,
    /// Remote execution limit sent with the job (`jobTimeoutMs`).
    pub job_timeout_secs: Option<u64>,
    /// Attempts for a single remote call that keeps failing transiently.
    pub max_retries: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            compression: false,
            delete_source_files: true,
            max_concurrent_exports: 5,
            admission: AdmissionPolicy::Reject,
            format: ExportFormat::Csv,
            print_header: true,
            field_delimiter: ",".to_string(),
            poll_initial_backoff_ms: 1_000,
            poll_max_backoff_ms: 30_000,
            poll_multiplier: 2.0,
            poll_timeout_secs: 3_600,
            job_timeout_secs: None,
            max_retries: 5,
        }
    }
}

impl ExportConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// `storage.cloud.google.com` links; access follows the caller's IAM identity.
    #[default]
    Authenticated,
    /// V4 signed URLs that work without credentials until they expire.
    Signed,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DownloadConfig {
    pub mode: DownloadMode,
    pub signer_service_account: Option<String>,
    pub url_expiry_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            mode: DownloadMode::Authenticated,
            signer_service_account: None,
            url_expiry_secs: 3_600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub require_auth: bool,
    pub environment: String,
    pub log_level: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            require_auth: true,
            environment: "production".to_string(),
            log_level: None,
        }
    }
}

impl ServerConfig {
    pub fn is_development(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "development" | "dev")
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: Option<String>,

    #[arg(long)]
    pub project: Option<String>,
    #[arg(long)]
    pub bucket: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub max_concurrent_exports: Option<usize>,
    /// Seconds to keep polling before giving up (the job keeps running)
    #[arg(long)]
    pub poll_timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        port: Option<u16>,
        /// Accept requests without a bearer token (local development only)
        #[arg(long)]
        no_auth: bool,
    },
    /// List datasets in the project
    Datasets,
    /// List tables in a dataset
    Tables { dataset: String },
    /// Export a table and wait for it to finish
    Export {
        dataset: String,
        table: String,
        /// Explicit destination pattern, e.g. gs://bucket/path/export-*.csv
        #[arg(long)]
        destination: Option<String>,
        /// Folder under the export bucket (ignored with --destination)
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        compress: bool,
        /// Merge the shards into a single file once the job succeeds
        #[arg(long)]
        merge: bool,
        /// Keep the shard objects after a successful merge
        #[arg(long)]
        keep_shards: bool,
    },
    /// Show the state of a job
    Status { job_id: String },
    /// Print download links for a finished job
    Download {
        job_id: String,
        #[arg(long)]
        merge: bool,
    },
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: AppConfig = if path.ends_with(".json") {
            serde_json::from_str(&contents)
                .map_err(|e| ExportError::ConfigError(format!("{}: {}", path, e)))?
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|e| ExportError::ConfigError(format!("{}: {}", path, e)))?
        };

        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PROJECT_ID") { self.gcp.project = v; }
        if let Some(v) = lookup("EXPORT_BUCKET") { self.gcp.export_bucket = v; }
        if let Some(v) = lookup("BIGQUERY_JOB_PROJECT") { self.gcp.job_project = Some(v); }
        if let Some(v) = lookup("BIGQUERY_LOCATION") { self.gcp.location = Some(v); }
        if let Some(v) = lookup("BIGQUERY_ENDPOINT") { self.gcp.bigquery_endpoint = v; }
        if let Some(v) = lookup("STORAGE_ENDPOINT") { self.gcp.storage_endpoint = v; }
        if let Some(v) = lookup("IAM_ENDPOINT") { self.gcp.iam_endpoint = v; }
        if let Some(v) = lookup("TOKENINFO_ENDPOINT") { self.gcp.tokeninfo_endpoint = v; }
        if let Some(v) = lookup("GCP_ACCESS_TOKEN") { self.gcp.access_token = Some(v); }

        if let Some(v) = lookup("EXPORT_COMPRESSION") { self.export.compression = parse_flag("EXPORT_COMPRESSION", &v)?; }
        if let Some(v) = lookup("DELETE_SOURCE_FILES") { self.export.delete_source_files = parse_flag("DELETE_SOURCE_FILES", &v)?; }
        if let Some(v) = lookup("MAX_CONCURRENT_EXPORTS") { self.export.max_concurrent_exports = parse_env("MAX_CONCURRENT_EXPORTS", &v)?; }
        if let Some(v) = lookup("ADMISSION_POLICY") { self.export.admission = v.parse()?; }
        if let Some(v) = lookup("EXPORT_TIMEOUT_SECONDS") { self.export.poll_timeout_secs = parse_env("EXPORT_TIMEOUT_SECONDS", &v)?; }
        if let Some(v) = lookup("JOB_TIMEOUT_SECONDS") { self.export.job_timeout_secs = Some(parse_env("JOB_TIMEOUT_SECONDS", &v)?); }

        if let Some(v) = lookup("SIGNER_SERVICE_ACCOUNT") {
            self.download.signer_service_account = Some(v);
            self.download.mode = DownloadMode::Signed;
        }
        if let Some(v) = lookup("URL_EXPIRY_SECONDS") { self.download.url_expiry_secs = parse_env("URL_EXPIRY_SECONDS", &v)?; }

        if let Some(v) = lookup("PORT") { self.server.port = parse_env("PORT", &v)?; }
        if let Some(v) = lookup("ENVIRONMENT") { self.server.environment = v; }
        if let Some(v) = lookup("REQUIRE_AUTH") { self.server.require_auth = parse_flag("REQUIRE_AUTH", &v)?; }
        if let Some(v) = lookup("LOG_LEVEL") { self.server.log_level = Some(v); }
        Ok(())
    }

    pub fn merge_cli(&mut self, args: &CliArgs) {
        if let Some(p) = &args.project { self.gcp.project = p.clone(); }
        if let Some(b) = &args.bucket { self.gcp.export_bucket = b.clone(); }
        if let Some(l) = &args.location { self.gcp.location = Some(l.clone()); }
        if let Some(m) = args.max_concurrent_exports { self.export.max_concurrent_exports = m; }
        if let Some(t) = args.poll_timeout_secs { self.export.poll_timeout_secs = t; }
        if let Command::Serve { port, no_auth } = &args.command {
            if let Some(p) = port { self.server.port = *p; }
            if *no_auth { self.server.require_auth = false; }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(ExportError::ConfigError(msg.to_string()));

        if self.gcp.project.trim().is_empty() {
            return fail("gcp.project (PROJECT_ID) is required");
        }
        if self.gcp.export_bucket.trim().is_empty() {
            return fail("gcp.export_bucket (EXPORT_BUCKET) is required");
        }
        if self.export.max_concurrent_exports == 0 {
            return fail("export.max_concurrent_exports must be at least 1");
        }
        if self.export.poll_initial_backoff_ms == 0 {
            return fail("export.poll_initial_backoff_ms must be positive");
        }
        if self.export.poll_max_backoff_ms < self.export.poll_initial_backoff_ms {
            return fail("export.poll_max_backoff_ms must not be below the initial backoff");
        }
        if self.export.poll_multiplier < 1.0 {
            return fail("export.poll_multiplier must be at least 1.0");
        }
        if self.export.poll_timeout_secs == 0
            || self.export.poll_timeout_secs > MAX_POLL_TIMEOUT_SECS
        {
            return fail("export.poll_timeout_secs must be between 1 and 2592000");
        }
        if self.export.field_delimiter.is_empty() {
            return fail("export.field_delimiter must not be empty");
        }
        if self.download.url_expiry_secs == 0
            || self.download.url_expiry_secs > MAX_SIGNED_URL_EXPIRY_SECS
        {
            return fail("download.url_expiry_secs must be between 1 and 604800");
        }
        if self.download.mode == DownloadMode::Signed
            && self.download.signer_service_account.is_none()
        {
            return fail("download.mode=signed requires download.signer_service_account");
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ExportError::ConfigError(format!("Invalid value for {}: {}", key, value)))
}

/// Accepts the `0`/`1` switches the Cloud Run deployment used as well as `true`/`false`.
fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ExportError::ConfigError(format!(
            "Invalid value for {}: {}",
            key, value
        ))),
    }
}
