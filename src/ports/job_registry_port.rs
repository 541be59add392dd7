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

//! # Job Registry Port
//!
//! Local bookkeeping of export jobs keyed by job id. The registry is a cache
//! of what the warehouse reported; the warehouse stays the source of truth,
//! so losing the registry (e.g. on restart) loses nothing that cannot be
//! re-read with the job id.

use crate::domain::entities::ExportJob;

pub trait JobRegistry: Send + Sync {
    fn get(&self, job_id: &str) -> Option<ExportJob>;

    /// Inserts `job`, or folds its state into the existing entry without
    /// ever moving that entry backwards. Returns the stored job.
    fn record(&self, job: ExportJob) -> ExportJob;
}
