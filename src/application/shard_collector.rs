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

//! # Shard Collector
//!
//! BigQuery splits large exports across many objects. This module finds
//! those shards after a job succeeds, puts them in shard-number order and,
//! when asked, concatenates them into one object.
//!
//! Merging runs on local temp files in a blocking task:
//! 1. Download every shard into a scratch directory.
//! 2. Concatenate in order, keeping only the first shard's header row.
//!    Gzip shards are recognised by their magic bytes and decoded, so a
//!    prefix may mix compressed and plain objects.
//! 3. Upload the result, and only then delete the shards.
//!
//! If any step fails the shards are left exactly as BigQuery wrote them.

use crate::application::backoff::{retry_transient, BackoffPolicy};
use crate::domain::destination::{trailing_sequence_index, DestinationPattern, GcsUri};
use crate::domain::entities::{ExportFormat, MergeResult, OutputShard};
use crate::domain::errors::{ExportError, Result};
use crate::ports::storage_port::{ObjectMeta, StoragePort};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use log::{error, info, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BUFFER_SIZE: usize = 1024 * 1024;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub format: ExportFormat,
    /// Drop the first line of every shard after the first.
    pub skip_headers: bool,
    pub compress_output: bool,
    pub delete_source_files: bool,
}

impl MergeOptions {
    fn content_type(&self) -> &'static str {
        if self.compress_output {
            "application/gzip"
        } else {
            self.format.content_type()
        }
    }
}

/// Counters from one local merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Uncompressed bytes written.
    pub bytes_written: u64,
    /// Lines written, the kept header included.
    pub rows_written: u64,
    pub headers_skipped: u64,
}

pub struct ShardCollector {
    storage: Arc<dyn StoragePort>,
    backoff: BackoffPolicy,
    max_retries: u32,
}

impl ShardCollector {
    pub fn new(storage: Arc<dyn StoragePort>, backoff: BackoffPolicy, max_retries: u32) -> Self {
        Self {
            storage,
            backoff,
            max_retries,
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>> {
        retry_transient(self.backoff, self.max_retries, "objects.list", || {
            self.storage.list_objects(bucket, prefix)
        })
        .await
    }

    /// Shards written for `pattern`, in ascending shard-number order.
    ///
    /// Only call this for a succeeded job: an empty result is reported as
    /// `NoShardsFound`, since a successful export always writes at least
    /// one object.
    pub async fn collect(&self, pattern: &DestinationPattern) -> Result<Vec<OutputShard>> {
        let objects = self.list(pattern.bucket(), pattern.list_prefix()).await?;

        let mut shards: Vec<OutputShard> = objects
            .into_iter()
            .filter_map(|o| {
                let index = pattern.match_index(&o.name)?;
                Some(to_shard(o, index))
            })
            .collect();

        if shards.is_empty() {
            error!(
                "Export reported success but {} matches no objects",
                pattern
            );
            return Err(ExportError::NoShardsFound(pattern.to_string()));
        }

        shards.sort_by_key(|s| s.sequence_index);
        info!("Found {} shard(s) for {}", shards.len(), pattern);
        Ok(shards)
    }

    /// Every object under `prefix`, ordered by the shard number in its name
    /// when it has one and by name otherwise.
    pub async fn collect_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<OutputShard>> {
        let mut objects = self.list(bucket, prefix).await?;
        if objects.is_empty() {
            return Err(ExportError::InvalidRequest(format!(
                "No files found with prefix: {}",
                prefix
            )));
        }

        objects.sort_by(|a, b| {
            let ka = trailing_sequence_index(&a.name);
            let kb = trailing_sequence_index(&b.name);
            (ka.is_none(), ka, &a.name).cmp(&(kb.is_none(), kb, &b.name))
        });
        Ok(objects
            .into_iter()
            .enumerate()
            .map(|(i, o)| to_shard(o, i as u64))
            .collect())
    }

    /// Looks up a single object, e.g. a merge result from an earlier call.
    pub async fn find(&self, uri: &GcsUri) -> Result<Option<OutputShard>> {
        let objects = self.list(&uri.bucket, &uri.object).await?;
        Ok(objects
            .into_iter()
            .find(|o| o.name == uri.object)
            .map(|o| to_shard(o, 0)))
    }

    /// Concatenates `shards` (already in order) into `destination`.
    pub async fn merge(
        &self,
        shards: &[OutputShard],
        destination: &GcsUri,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        if shards.is_empty() {
            return Err(ExportError::NoShardsFound(destination.to_string()));
        }
        if !options.format.is_mergeable() {
            return Err(ExportError::InvalidRequest(format!(
                "{} exports cannot be merged",
                options.format
            )));
        }

        let workdir = tempfile::tempdir()?;
        let mut inputs = Vec::with_capacity(shards.len());
        for (i, shard) in shards.iter().enumerate() {
            let path = workdir.path().join(format!("shard-{:06}", i));
            retry_transient(self.backoff, self.max_retries, "objects.get", || {
                self.storage.download_to_file(&shard.bucket, &shard.name, &path)
            })
            .await?;
            inputs.push(path);
        }

        let output = workdir.path().join("merged");
        let stats = {
            let output = output.clone();
            let opts = options.clone();
            tokio::task::spawn_blocking(move || merge_shard_files(&inputs, &output, &opts))
                .await
                .map_err(|e| ExportError::MergeError(format!("Merge task aborted: {}", e)))?
                .map_err(|e| ExportError::MergeError(e.to_string()))?
        };

        let uploaded = self
            .storage
            .upload_from_file(
                &output,
                &destination.bucket,
                &destination.object,
                options.content_type(),
            )
            .await?;
        info!(
            "Merged {} shard(s) into {} ({} rows, {} headers dropped)",
            shards.len(),
            destination,
            stats.rows_written,
            stats.headers_skipped
        );

        let source_files_deleted = if options.delete_source_files {
            self.delete_shards(shards, destination).await
        } else {
            false
        };

        Ok(MergeResult {
            merged_uri: destination.to_string(),
            total_size_bytes: uploaded.size_bytes,
            rows_written: stats.rows_written,
            headers_skipped: stats.headers_skipped,
            source_files: shards.len(),
            source_files_deleted,
            compressed: options.compress_output,
        })
    }

    /// Merges every object under `prefix` into `destination_name` in the
    /// same bucket. `.gz` is appended to the name when compressing.
    pub async fn merge_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        destination_name: &str,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        let name = if options.compress_output && !destination_name.ends_with(".gz") {
            format!("{}.gz", destination_name)
        } else {
            destination_name.to_string()
        };
        let shards: Vec<OutputShard> = self
            .collect_prefix(bucket, prefix)
            .await?
            .into_iter()
            .filter(|s| s.name != name)
            .collect();
        self.merge(&shards, &GcsUri::new(bucket, name), options).await
    }

    /// Returns true only if every shard is gone.
    async fn delete_shards(&self, shards: &[OutputShard], keep: &GcsUri) -> bool {
        let mut all_deleted = true;
        for shard in shards {
            if shard.bucket == keep.bucket && shard.name == keep.object {
                continue;
            }
            if let Err(e) = self.storage.delete_object(&shard.bucket, &shard.name).await {
                warn!("Could not delete shard {}: {}", shard.uri, e);
                all_deleted = false;
            }
        }
        all_deleted
    }
}

fn to_shard(object: ObjectMeta, sequence_index: u64) -> OutputShard {
    OutputShard {
        uri: GcsUri::new(object.bucket.as_str(), object.name.as_str()).to_string(),
        bucket: object.bucket,
        name: object.name,
        size_bytes: object.size_bytes,
        sequence_index,
    }
}

/// Concatenates local shard files into `output`.
///
/// Empty shards are skipped, so the header that is kept belongs to the first
/// shard with content. A newline is inserted after any shard whose last line
/// is unterminated.
pub fn merge_shard_files(
    inputs: &[PathBuf],
    output: &Path,
    options: &MergeOptions,
) -> io::Result<MergeStats> {
    let file = File::create(output)?;
    let writer = BufWriter::with_capacity(BUFFER_SIZE, file);

    if options.compress_output {
        let mut encoder = GzEncoder::new(writer, flate2::Compression::default());
        let stats = concat_into(inputs, &mut encoder, options)?;
        encoder.finish()?.flush()?;
        Ok(stats)
    } else {
        let mut writer = writer;
        let stats = concat_into(inputs, &mut writer, options)?;
        writer.flush()?;
        Ok(stats)
    }
}

/// Opens a shard for line reading, decoding it when it is a gzip stream.
fn open_shard(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, File::open(path)?);
    let gzipped = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    Ok(if gzipped {
        Box::new(BufReader::with_capacity(BUFFER_SIZE, MultiGzDecoder::new(reader)))
    } else {
        Box::new(reader)
    })
}

fn concat_into<W: Write>(
    inputs: &[PathBuf],
    out: &mut W,
    options: &MergeOptions,
) -> io::Result<MergeStats> {
    let mut stats = MergeStats::default();
    let mut wrote_any = false;
    let mut line = Vec::with_capacity(8 * 1024);

    for path in inputs {
        let mut reader = open_shard(path)?;
        let mut first_line = true;
        let mut last_ended_with_newline = true;

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if first_line {
                first_line = false;
                if wrote_any && options.skip_headers {
                    stats.headers_skipped += 1;
                    continue;
                }
            }
            out.write_all(&line)?;
            stats.bytes_written += line.len() as u64;
            stats.rows_written += 1;
            last_ended_with_newline = line.last() == Some(&b'\n');
            wrote_any = true;
        }

        if !last_ended_with_newline {
            out.write_all(b"\n")?;
            stats.bytes_written += 1;
        }
    }
    Ok(stats)
}
