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

//! # Job Poller
//!
//! Watches extract jobs until they reach a terminal state. Everything the
//! poller needs is re-read from the warehouse by job id, so a job submitted
//! before a restart can be polled by a fresh process.

use crate::application::backoff::{retry_transient, BackoffPolicy};
use crate::domain::entities::{ExportJob, JobState};
use crate::domain::errors::{ExportError, Result};
use crate::ports::job_registry_port::JobRegistry;
use crate::ports::warehouse_port::{RemoteJobStatus, WarehousePort};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub struct JobPoller {
    warehouse: Arc<dyn WarehousePort>,
    registry: Arc<dyn JobRegistry>,
    backoff: BackoffPolicy,
    max_retries: u32,
    /// Used for jobs the registry has never seen.
    default_location: Option<String>,
}

impl JobPoller {
    pub fn new(
        warehouse: Arc<dyn WarehousePort>,
        registry: Arc<dyn JobRegistry>,
        backoff: BackoffPolicy,
        max_retries: u32,
    ) -> Self {
        Self {
            warehouse,
            registry,
            backoff,
            max_retries,
            default_location: None,
        }
    }

    pub fn with_default_location(mut self, location: Option<String>) -> Self {
        self.default_location = location;
        self
    }

    /// Reads the job's current state once and folds it into the registry.
    pub async fn poll(&self, job_id: &str) -> Result<ExportJob> {
        let known = self.registry.get(job_id);
        if let Some(job) = &known {
            if job.state.is_terminal() {
                return Ok(job.clone());
            }
        }

        let location = known
            .as_ref()
            .and_then(|j| j.location.clone())
            .or_else(|| self.default_location.clone());
        let remote = retry_transient(self.backoff, self.max_retries, "jobs.get", || {
            self.warehouse.get_job(job_id, location.as_deref())
        })
        .await?;

        let job = match known {
            Some(mut job) => {
                let before = job.state;
                if job.observe(remote.state, remote.error) {
                    info!("Job {} is {} (was {})", job_id, job.state, before);
                }
                if job.location.is_none() {
                    job.location = remote.location;
                }
                job
            }
            None => rehydrate(remote)?,
        };

        let stored = self.registry.record(job);
        debug!("Polled {}: {}", job_id, stored.state);
        Ok(stored)
    }

    /// Polls with exponential backoff until the job finishes or `timeout`
    /// elapses. A timeout only stops the watching: the remote job is left
    /// alone and a later call with the same id picks up where this one
    /// stopped.
    pub async fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> Result<ExportJob> {
        let started = Instant::now();
        // A timeout too large to represent means no deadline at all.
        let deadline = started.checked_add(timeout);
        let mut delays = self.backoff.delays();

        loop {
            let job = self.poll(job_id).await?;
            match job.state {
                JobState::Succeeded => return Ok(job),
                JobState::Failed => {
                    return Err(ExportError::JobFailed {
                        job_id: job.job_id,
                        message: job.error.unwrap_or_else(|| "Unknown error".to_string()),
                    })
                }
                JobState::Pending | JobState::Running => {}
            }

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                info!(
                    "Stopped polling {} after {:?}; the job is still {}",
                    job_id,
                    started.elapsed(),
                    job.state
                );
                return Err(ExportError::Timeout {
                    job_id: job_id.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            let mut delay = delays.next().unwrap_or(self.backoff.max);
            if let Some(d) = deadline {
                delay = delay.min(d - now);
            }
            tokio::time::sleep(delay).await;
        }
    }
}

/// Builds a registry entry for a job this process did not submit.
fn rehydrate(remote: RemoteJobStatus) -> Result<ExportJob> {
    let request = remote.request.ok_or_else(|| {
        ExportError::NotFound(format!("Job {} is not a table export", remote.job_id))
    })?;
    info!("Recovered job {} for {}", remote.job_id, request.table_ref());

    let mut job = ExportJob::new(remote.job_id, remote.location, request);
    if let Some(created) = remote.created_at {
        job.created_at = created;
        job.updated_at = created;
    }
    job.observe(remote.state, remote.error);
    Ok(job)
}
