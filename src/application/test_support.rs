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

//! Scripted in-memory ports shared by the application tests.

use crate::domain::entities::{
    Compression, DatasetInfo, ExportFormat, ExportRequest, JobState, TableInfo,
};
use crate::domain::errors::{ExportError, Result};
use crate::ports::storage_port::{ObjectMeta, StoragePort};
use crate::ports::warehouse_port::{ExtractJobSpec, RemoteJobStatus, WarehousePort};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn csv_request(pattern: &str) -> ExportRequest {
    ExportRequest {
        project: "proj".into(),
        dataset: "sales".into(),
        table: "orders".into(),
        destination_uri_pattern: pattern.into(),
        format: ExportFormat::Csv,
        compression: Compression::None,
        print_header: true,
        field_delimiter: ",".into(),
    }
}

/// A warehouse whose jobs walk through `script`, one state per `get_job`.
/// The last scripted state repeats forever.
#[derive(Default)]
pub struct FakeWarehouse {
    pub tables: Mutex<HashSet<(String, String)>>,
    pub forbidden: AtomicBool,
    pub script: Mutex<VecDeque<(JobState, Option<String>)>>,
    pub get_job_errors: Mutex<VecDeque<ExportError>>,
    pub submitted: Mutex<Vec<ExtractJobSpec>>,
    pub submit_calls: AtomicUsize,
    pub get_job_calls: AtomicUsize,
    /// Jobs that exist remotely, e.g. from before a restart.
    pub remote_jobs: Mutex<HashMap<String, ExportRequest>>,
}

impl FakeWarehouse {
    pub fn with_table(dataset: &str, table: &str) -> Self {
        let fake = Self::default();
        fake.add_table(dataset, table);
        fake
    }

    pub fn add_table(&self, dataset: &str, table: &str) {
        self.tables
            .lock()
            .unwrap()
            .insert((dataset.to_string(), table.to_string()));
    }

    pub fn script(&self, states: &[(JobState, Option<&str>)]) {
        let mut script = self.script.lock().unwrap();
        script.clear();
        script.extend(states.iter().map(|(s, e)| (*s, e.map(str::to_string))));
    }

    pub fn submit_count(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn get_job_count(&self) -> usize {
        self.get_job_calls.load(Ordering::SeqCst)
    }

    fn next_state(&self) -> (JobState, Option<String>) {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or((JobState::Running, None))
        }
    }
}

#[async_trait]
impl WarehousePort for FakeWarehouse {
    async fn list_datasets(&self, _project: &str) -> Result<Vec<DatasetInfo>> {
        let tables = self.tables.lock().unwrap();
        let mut ids: Vec<String> = tables.iter().map(|(d, _)| d.clone()).collect();
        ids.sort();
        ids.dedup();
        Ok(ids
            .into_iter()
            .map(|id| DatasetInfo {
                friendly_name: id.clone(),
                id,
                location: Some("US".into()),
            })
            .collect())
    }

    async fn list_tables(&self, _project: &str, dataset: &str) -> Result<Vec<TableInfo>> {
        let tables = self.tables.lock().unwrap();
        let mut found: Vec<TableInfo> = tables
            .iter()
            .filter(|(d, _)| d == dataset)
            .map(|(_, t)| TableInfo {
                id: t.clone(),
                table_type: "TABLE".into(),
                num_rows: Some(10),
                size_bytes: Some(100),
                created: None,
                modified: None,
            })
            .collect();
        if found.is_empty() {
            return Err(ExportError::NotFound("Dataset not found".into()));
        }
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn get_table(&self, _project: &str, dataset: &str, table: &str) -> Result<TableInfo> {
        if self.forbidden.load(Ordering::SeqCst) {
            return Err(ExportError::PermissionDenied(
                "Access Denied: bigquery.tables.get".into(),
            ));
        }
        let tables = self.tables.lock().unwrap();
        if !tables.contains(&(dataset.to_string(), table.to_string())) {
            return Err(ExportError::NotFound(format!("Not found: Table {}", table)));
        }
        Ok(TableInfo {
            id: table.to_string(),
            table_type: "TABLE".into(),
            num_rows: Some(10),
            size_bytes: Some(100),
            created: None,
            modified: None,
        })
    }

    async fn submit_extract(&self, spec: &ExtractJobSpec) -> Result<RemoteJobStatus> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().unwrap().push(spec.clone());
        self.remote_jobs
            .lock()
            .unwrap()
            .insert(spec.job_id.clone(), spec.request.clone());
        Ok(RemoteJobStatus {
            job_id: spec.job_id.clone(),
            location: spec.location.clone(),
            state: JobState::Pending,
            error: None,
            created_at: None,
            request: Some(spec.request.clone()),
        })
    }

    async fn get_job(&self, job_id: &str, location: Option<&str>) -> Result<RemoteJobStatus> {
        self.get_job_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.get_job_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        let request = self
            .remote_jobs
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| ExportError::NotFound(format!("Not found: Job {}", job_id)))?;
        let (state, error) = self.next_state();
        Ok(RemoteJobStatus {
            job_id: job_id.to_string(),
            location: location.map(str::to_string),
            state,
            error,
            created_at: None,
            request: Some(request),
        })
    }
}

/// A bucket store that lists objects in reverse name order, so callers
/// cannot rely on listing order.
#[derive(Default)]
pub struct FakeStorage {
    pub objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_uploads: AtomicBool,
}

impl FakeStorage {
    pub fn put(&self, bucket: &str, name: &str, body: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), name.to_string()), body.into());
    }

    pub fn get(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), name.to_string()))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .map(|(_, n)| n.clone())
            .collect()
    }
}

#[async_trait]
impl StoragePort for FakeStorage {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .rev()
            .filter(|((b, n), _)| b == bucket && n.starts_with(prefix))
            .map(|((b, n), body)| ObjectMeta {
                bucket: b.clone(),
                name: n.clone(),
                size_bytes: body.len() as u64,
            })
            .collect())
    }

    async fn download_to_file(&self, bucket: &str, name: &str, dest: &Path) -> Result<u64> {
        let body = self
            .get(bucket, name)
            .ok_or_else(|| ExportError::NotFound(format!("{}/{}", bucket, name)))?;
        std::fs::write(dest, &body)?;
        Ok(body.len() as u64)
    }

    async fn upload_from_file(
        &self,
        src: &Path,
        bucket: &str,
        name: &str,
        _content_type: &str,
    ) -> Result<ObjectMeta> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ExportError::ServiceError("upload rejected".into()));
        }
        let body = std::fs::read(src)?;
        let size_bytes = body.len() as u64;
        self.put(bucket, name, body);
        Ok(ObjectMeta {
            bucket: bucket.to_string(),
            name: name.to_string(),
            size_bytes,
        })
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), name.to_string()));
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
