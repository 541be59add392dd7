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

//! # In-Memory Job Registry
//!
//! A `RwLock`-guarded map: many concurrent status lookups, short exclusive
//! sections for updates. Nothing here has to survive a restart because jobs
//! can be rebuilt from BigQuery by id.
//!
//! Finished jobs are only a cache, so the oldest ones are evicted once more
//! than `terminal_limit` of them are held. Running jobs are never evicted.

use crate::domain::entities::ExportJob;
use crate::ports::job_registry_port::JobRegistry;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

pub const DEFAULT_TERMINAL_LIMIT: usize = 10_000;

#[derive(Default)]
struct Entries {
    jobs: HashMap<String, ExportJob>,
    /// Ids of terminal jobs, oldest first.
    finished: VecDeque<String>,
}

pub struct InMemoryJobRegistry {
    entries: RwLock<Entries>,
    terminal_limit: usize,
}

impl Default for InMemoryJobRegistry {
    fn default() -> Self {
        Self::with_terminal_limit(DEFAULT_TERMINAL_LIMIT)
    }
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_terminal_limit(terminal_limit: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            terminal_limit,
        }
    }
}

impl Entries {
    fn evict_finished(&mut self, limit: usize) {
        while self.finished.len() > limit {
            if let Some(id) = self.finished.pop_front() {
                self.jobs.remove(&id);
                debug!("Evicted finished job {} from the registry", id);
            }
        }
    }
}

impl JobRegistry for InMemoryJobRegistry {
    fn get(&self, job_id: &str) -> Option<ExportJob> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.jobs.get(job_id).cloned()
    }

    fn record(&self, job: ExportJob) -> ExportJob {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entries = &mut *guard;
        let (stored, became_terminal) = match entries.jobs.get_mut(&job.job_id) {
            Some(existing) => {
                let was_terminal = existing.state.is_terminal();
                existing.observe(job.state, job.error);
                if existing.location.is_none() {
                    existing.location = job.location;
                }
                (existing.clone(), !was_terminal && existing.state.is_terminal())
            }
            None => {
                let terminal = job.state.is_terminal();
                entries.jobs.insert(job.job_id.clone(), job.clone());
                (job, terminal)
            }
        };
        if became_terminal {
            entries.finished.push_back(stored.job_id.clone());
            entries.evict_finished(self.terminal_limit);
        }
        stored
    }
}
