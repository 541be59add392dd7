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

//! # Destination URIs
//!
//! BigQuery writes an export to `gs://bucket/path/export-*.csv` and replaces
//! the single `*` with a zero-padded 12 digit shard number
//! (`export-000000000000.csv`, `export-000000000001.csv`, ...). This module
//! parses those patterns and maps object names back to their shard index.

use crate::domain::entities::{Compression, ExportFormat};
use crate::domain::errors::{ExportError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single `gs://bucket/object` location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcsUri {
    pub bucket: String,
    pub object: String,
}

impl GcsUri {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("gs://")
            .ok_or_else(|| ExportError::InvalidRequest(format!("Not a gs:// URI: {}", uri)))?;
        let (bucket, object) = rest.split_once('/').ok_or_else(|| {
            ExportError::InvalidRequest(format!("URI has no object name: {}", uri))
        })?;
        if bucket.is_empty() || object.is_empty() {
            return Err(ExportError::InvalidRequest(format!(
                "URI must name a bucket and an object: {}",
                uri
            )));
        }
        Ok(Self::new(bucket, object))
    }
}

impl fmt::Display for GcsUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.object)
    }
}

/// A wildcard destination such as `gs://bucket/2024/export-*.csv.gz`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPattern {
    bucket: String,
    /// Object name text before the wildcard.
    prefix: String,
    /// Object name text after the wildcard.
    suffix: String,
}

impl DestinationPattern {
    /// Parses and validates a pattern. Exactly one `*` is required, and it
    /// must sit inside the object name so that BigQuery is free to shard.
    pub fn parse(pattern: &str) -> Result<Self> {
        let uri = GcsUri::parse(pattern)?;
        if uri.bucket.contains('*') {
            return Err(ExportError::InvalidRequest(format!(
                "Wildcard is not allowed in the bucket name: {}",
                pattern
            )));
        }
        let wildcards = uri.object.matches('*').count();
        if wildcards != 1 {
            return Err(ExportError::InvalidRequest(format!(
                "Destination must contain exactly one '*' wildcard (found {}): {}",
                wildcards, pattern
            )));
        }
        let (prefix, suffix) = uri
            .object
            .split_once('*')
            .ok_or_else(|| ExportError::InvalidRequest(pattern.to_string()))?;
        if suffix.contains('/') {
            return Err(ExportError::InvalidRequest(format!(
                "Wildcard must be in the last path segment: {}",
                pattern
            )));
        }
        Ok(Self {
            bucket: uri.bucket.clone(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// Builds the default layout `{prefix/}{timestamp}/export-*.{ext}[.gz]`.
    pub fn default_for(
        bucket: &str,
        destination_prefix: Option<&str>,
        timestamp: &str,
        format: ExportFormat,
        compression: Compression,
    ) -> Self {
        let base = match destination_prefix.map(|p| p.trim_matches('/')) {
            Some(p) if !p.is_empty() => format!("{}/{}", p, timestamp),
            _ => timestamp.to_string(),
        };
        let mut suffix = format!(".{}", format.extension());
        if compression == Compression::Gzip {
            suffix.push_str(".gz");
        }
        Self {
            bucket: bucket.to_string(),
            prefix: format!("{}/export-", base),
            suffix,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Literal object-name prefix, suitable for a storage list call.
    pub fn list_prefix(&self) -> &str {
        &self.prefix
    }

    /// The object this pattern names with its wildcard replaced.
    pub fn with_wildcard(&self, replacement: &str) -> GcsUri {
        GcsUri::new(
            self.bucket.as_str(),
            format!("{}{}{}", self.prefix, replacement, self.suffix),
        )
    }

    /// Returns the shard number if `object_name` was produced by this pattern.
    pub fn match_index(&self, object_name: &str) -> Option<u64> {
        let middle = object_name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())?;
        if middle.is_empty() || !middle.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        middle.parse().ok()
    }
}

impl fmt::Display for DestinationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}*{}", self.bucket, self.prefix, self.suffix)
    }
}

/// Best-effort shard number for a name with no known pattern: the last run
/// of digits in the final path segment.
pub fn trailing_sequence_index(object_name: &str) -> Option<u64> {
    let file = object_name.rsplit('/').next().unwrap_or(object_name);
    let bytes = file.as_bytes();
    let end = bytes.iter().rposition(|b| b.is_ascii_digit())? + 1;
    let start = bytes[..end]
        .iter()
        .rposition(|b| !b.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    file[start..end].parse().ok()
}
