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

//! Handlers for `/api/v1`.

use crate::application::export_service::{DownloadOptions, DownloadResponse, MergeRequest};
use crate::domain::entities::{DownloadLink, ExportJob, ExportOptions, JobState, MergeResult};
use crate::domain::errors::ExportError;
use crate::server::error::ApiError;
use crate::server::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/datasets", get(list_datasets))
        .route("/datasets/:dataset/tables", get(list_dataset_tables))
        .route("/tables", get(list_tables))
        .route("/export", post(start_export))
        .route("/status", get(job_status))
        .route("/download", get(download))
        .route("/download/*object", get(object_download))
        .route("/merge", post(merge))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ExportError::InvalidRequest(e.body_text()).into())
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(v)| v)
        .map_err(|e| ExportError::InvalidRequest(e.body_text()).into())
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ExportError::InvalidRequest(format!("{} is required", name)).into()),
    }
}

async fn list_datasets(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let datasets = state.service.list_datasets().await?;
    Ok(Json(json!({ "datasets": datasets })))
}

#[derive(Debug, Deserialize)]
pub struct TablesQuery {
    pub dataset: Option<String>,
}

async fn list_tables(
    State(state): State<Arc<AppState>>,
    params: Result<Query<TablesQuery>, QueryRejection>,
) -> ApiResult<Value> {
    let dataset = required(query(params)?.dataset, "Dataset ID")?;
    let tables = state.service.list_tables(&dataset).await?;
    Ok(Json(json!({ "tables": tables })))
}

async fn list_dataset_tables(
    State(state): State<Arc<AppState>>,
    Path(dataset): Path<String>,
) -> ApiResult<Value> {
    let tables = state.service.list_tables(&dataset).await?;
    Ok(Json(json!({ "tables": tables })))
}

/// `POST /export` body. `dataset_id`/`table_id` and the top-level
/// `destination_prefix`/`compression` of older clients are accepted too.
#[derive(Debug, Deserialize)]
pub struct ExportBody {
    #[serde(alias = "dataset_id")]
    pub dataset: String,
    #[serde(alias = "table_id")]
    pub table: String,
    #[serde(default)]
    pub options: ExportOptions,
    #[serde(default)]
    pub destination_prefix: Option<String>,
    #[serde(default)]
    pub compression: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ExportAccepted {
    pub job_id: String,
    pub state: JobState,
    pub destination_uri_pattern: String,
    pub created_at: DateTime<Utc>,
}

async fn start_export(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExportBody>, JsonRejection>,
) -> ApiResult<ExportAccepted> {
    let ExportBody {
        dataset,
        table,
        mut options,
        destination_prefix,
        compression,
    } = body(payload)?;
    if options.destination_prefix.is_none() {
        options.destination_prefix = destination_prefix;
    }
    if options.compression.is_none() {
        options.compression = compression;
    }

    let job = state.service.start_export(&dataset, &table, &options).await?;
    Ok(Json(ExportAccepted {
        job_id: job.job_id,
        state: job.state,
        destination_uri_pattern: job.request.destination_uri_pattern,
        created_at: job.created_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub job_id: Option<String>,
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    params: Result<Query<StatusQuery>, QueryRejection>,
) -> ApiResult<ExportJob> {
    let job_id = required(query(params)?.job_id, "job_id")?;
    Ok(Json(state.service.status(&job_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub job_id: Option<String>,
    pub merge: Option<bool>,
    pub delete_source_files: Option<bool>,
}

async fn download(
    State(state): State<Arc<AppState>>,
    params: Result<Query<DownloadQuery>, QueryRejection>,
) -> ApiResult<DownloadResponse> {
    let params = query(params)?;
    let job_id = required(params.job_id, "job_id")?;
    let options = DownloadOptions {
        merge: params.merge,
        delete_source_files: params.delete_source_files,
    };
    Ok(Json(state.service.download(&job_id, &options).await?))
}

#[derive(Debug, Serialize)]
pub struct ObjectLink {
    pub signed_url: String,
    /// Seconds until the link stops working; absent for links that rely on
    /// the caller's own identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(flatten)]
    pub link: DownloadLink,
}

async fn object_download(
    State(state): State<Arc<AppState>>,
    Path(object): Path<String>,
) -> ApiResult<ObjectLink> {
    let link = state.service.object_link(&object).await?;
    Ok(Json(ObjectLink {
        signed_url: link.url.clone(),
        expires_in: link
            .expires_at
            .map(|at| (at - Utc::now()).num_seconds().max(0)),
        link,
    }))
}

async fn merge(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<MergeRequest>, JsonRejection>,
) -> ApiResult<MergeResult> {
    let request = body(payload)?;
    Ok(Json(state.service.merge(&request).await?))
}
