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

//! # BigQuery Table Exporter (CLI)
//!
//! `serve` runs the HTTP API; the other subcommands drive the same export
//! service from a terminal and print JSON to stdout.

use bq_table_exporter::application::export_service::{DownloadOptions, ExportService};
use bq_table_exporter::application::runtime::RuntimeContext;
use bq_table_exporter::config::{AppConfig, CliArgs, Command};
use bq_table_exporter::domain::entities::ExportOptions;
use bq_table_exporter::domain::errors::{ExportError, Result};
use bq_table_exporter::server;
use clap::Parser;
use log::{error, info};
use serde::Serialize;
use std::process;

#[tokio::main]
async fn main() {
    // 1. Parse arguments and layer configuration
    let args = CliArgs::parse();
    let loaded = load_config(&args);

    // 2. Initialize logging (RUST_LOG wins over the configured level)
    let level = loaded
        .as_ref()
        .ok()
        .and_then(|c| c.server.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match loaded {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(2);
        }
    };

    // 3. Run the command
    if let Err(e) = run(args.command, config).await {
        if let ExportError::Timeout { job_id, .. } = &e {
            error!("{}. Check on it later with: status {}", e, job_id);
        } else {
            error!("{}", e);
        }
        process::exit(1);
    }
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    config.apply_env()?;
    config.merge_cli(args);
    config.validate()?;
    Ok(config)
}

async fn run(command: Command, config: AppConfig) -> Result<()> {
    let context = RuntimeContext::init(config).await?;
    if let Command::Serve { .. } = command {
        return server::serve(context).await;
    }

    let service = context.service;
    match command {
        Command::Serve { .. } => Ok(()),
        Command::Datasets => print_json(&service.list_datasets().await?),
        Command::Tables { dataset } => print_json(&service.list_tables(&dataset).await?),
        Command::Export {
            dataset,
            table,
            destination,
            prefix,
            compress,
            merge,
            keep_shards,
        } => {
            let options = ExportOptions {
                compression: compress.then_some(true),
                destination_prefix: prefix,
                destination_uri_pattern: destination,
                ..ExportOptions::default()
            };
            export(&service, &dataset, &table, &options, merge, keep_shards).await
        }
        Command::Status { job_id } => print_json(&service.status(&job_id).await?),
        Command::Download { job_id, merge } => {
            let options = DownloadOptions {
                merge: Some(merge),
                delete_source_files: None,
            };
            print_json(&service.download(&job_id, &options).await?)
        }
    }
}

async fn export(
    service: &ExportService,
    dataset: &str,
    table: &str,
    options: &ExportOptions,
    merge: bool,
    keep_shards: bool,
) -> Result<()> {
    let job = service.start_export(dataset, table, options).await?;
    info!(
        "Started job {} writing to {}",
        job.job_id, job.request.destination_uri_pattern
    );

    let job = service.wait(&job.job_id, None).await?;
    info!("Job {} finished", job.job_id);

    let download = service
        .download(
            &job.job_id,
            &DownloadOptions {
                merge: Some(merge),
                delete_source_files: Some(!keep_shards),
            },
        )
        .await?;
    if let Some(e) = &download.merge_error {
        error!("Merge failed, the shards were kept: {}", e);
    }
    print_json(&download)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
