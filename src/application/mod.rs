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

//! Application services: submitting exports, watching jobs, collecting and
//! merging shards, and issuing download links.

pub mod backoff;
pub mod download;
pub mod export_service;
pub mod orchestrator;
pub mod poller;
pub mod runtime;
pub mod shard_collector;

#[cfg(test)]
pub(crate) mod test_support;
