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

//! # Storage Port
//!
//! Object storage operations the shard collector needs. Transfers go through
//! local files so that multi-gigabyte shards never sit in memory.

use crate::domain::errors::Result;
use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub bucket: String,
    pub name: String,
    pub size_bytes: u64,
}

#[async_trait]
pub trait StoragePort: Send + Sync {
    /// All objects in `bucket` whose name starts with `prefix`, in whatever
    /// order the backend returns them.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Streams an object into `dest`, returning the number of bytes written.
    async fn download_to_file(&self, bucket: &str, name: &str, dest: &Path) -> Result<u64>;

    async fn upload_from_file(
        &self,
        src: &Path,
        bucket: &str,
        name: &str,
        content_type: &str,
    ) -> Result<ObjectMeta>;

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<()>;
}
