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

//! # BigQuery Table Exporter
//!
//! Exports BigQuery tables to Cloud Storage through managed extract jobs,
//! watches the jobs to completion, optionally merges the resulting shards
//! into one file and issues download links for the outcome.
//!
//! The crate follows the **Hexagonal Architecture** (Ports and Adapters):
//! `domain` and `application` hold the workflow, `ports` declare what it
//! needs from the outside world, and `infrastructure` implements those
//! ports against Google's REST APIs.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod ports;
pub mod server;
