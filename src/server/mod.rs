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

//! # HTTP API
//!
//! An axum router exposing the export service. `/healthz` is open; every
//! route under `/api/v1` goes through the bearer-token middleware when
//! authentication is enabled.

pub mod auth;
pub mod error;
pub mod routes;

use crate::application::export_service::ExportService;
use crate::application::runtime::RuntimeContext;
use crate::domain::errors::Result;
use crate::ports::credential_port::TokenVerifier;
use axum::routing::get;
use axum::{middleware, Json, Router};
use log::{info, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub service: Arc<ExportService>,
    /// `None` disables authentication.
    pub verifier: Option<Arc<dyn TokenVerifier>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let auth_layer = middleware::from_fn_with_state(Arc::clone(&state), auth::auth_middleware);

    Router::new()
        .route("/healthz", get(health))
        .nest("/api/v1", routes::api_routes().layer(auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Serves the API until Ctrl-C / SIGINT.
pub async fn serve(context: RuntimeContext) -> Result<()> {
    let server = context.service.config().server.clone();
    let verifier = if server.require_auth {
        Some(context.verifier)
    } else {
        warn!("Authentication is disabled; every caller is trusted");
        None
    };
    let state = Arc::new(AppState {
        service: context.service,
        verifier,
    });

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{} ({})", addr, server.environment);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{csv_request, FakeStorage, FakeWarehouse};
    use crate::config::AppConfig;
    use crate::domain::entities::JobState;
    use crate::domain::errors::ExportError;
    use crate::infrastructure::memory::job_registry::InMemoryJobRegistry;
    use crate::ports::credential_port::TokenInfo;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    struct FixedVerifier;

    #[async_trait]
    impl TokenVerifier for FixedVerifier {
        async fn verify(&self, token: &str) -> Result<TokenInfo> {
            if token == "good" {
                Ok(TokenInfo {
                    email: Some("analyst@example.com".into()),
                    scopes: vec![],
                    expires_in: Some(600),
                })
            } else {
                Err(ExportError::PermissionDenied("Invalid token".into()))
            }
        }
    }

    fn app(warehouse: Arc<FakeWarehouse>, storage: Arc<FakeStorage>) -> Router {
        let mut config = AppConfig::default();
        config.gcp.project = "proj".into();
        config.gcp.export_bucket = "exports".into();
        let service = ExportService::new(
            config,
            warehouse,
            storage,
            Arc::new(InMemoryJobRegistry::new()),
            None,
        )
        .unwrap();
        router(Arc::new(AppState {
            service: Arc::new(service),
            verifier: Some(Arc::new(FixedVerifier)),
        }))
    }

    fn default_app() -> Router {
        app(
            Arc::new(FakeWarehouse::with_table("sales", "orders")),
            Arc::new(FakeStorage::default()),
        )
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("Authorization", "Bearer good")
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Authorization", "Bearer good")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_needs_no_token() {
        let response = default_app()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_api_requires_bearer_token() {
        let response = default_app()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/datasets")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "UNAUTHORIZED");

        let response = default_app()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/datasets")
                    .header("Authorization", "Bearer forged")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Invalid token");
    }

    #[tokio::test]
    async fn test_list_datasets_and_tables() {
        let response = default_app().oneshot(get("/api/v1/datasets")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["datasets"][0]["id"], "sales");

        let response = default_app()
            .oneshot(get("/api/v1/tables?dataset=sales"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["tables"][0]["id"], "orders");
        assert_eq!(body["tables"][0]["type"], "TABLE");

        let response = default_app()
            .oneshot(get("/api/v1/datasets/sales/tables"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = default_app().oneshot(get("/api/v1/tables")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_export_accepts_legacy_field_names() {
        let warehouse = Arc::new(FakeWarehouse::with_table("sales", "orders"));
        let response = app(warehouse.clone(), Arc::new(FakeStorage::default()))
            .oneshot(post_json(
                "/api/v1/export",
                json!({ "dataset_id": "sales", "table_id": "orders", "compression": true }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["job_id"].as_str().unwrap().starts_with("bq_export_"));
        assert_eq!(body["state"], "PENDING");
        assert!(body["destination_uri_pattern"]
            .as_str()
            .unwrap()
            .ends_with("export-*.csv.gz"));
        assert_eq!(warehouse.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_export_errors_map_to_statuses() {
        let response = default_app()
            .oneshot(post_json("/api/v1/export", json!({ "dataset": "sales" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = default_app()
            .oneshot(post_json(
                "/api/v1/export",
                json!({ "dataset": "sales", "table": "missing" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "Invalid request: Table not found: proj.sales.missing"
        );
    }

    #[tokio::test]
    async fn test_status_and_download_lifecycle() {
        let warehouse = Arc::new(FakeWarehouse::default());
        let storage = Arc::new(FakeStorage::default());
        warehouse.remote_jobs.lock().unwrap().insert(
            "job_web".into(),
            csv_request("gs://exports/web/export-*.csv"),
        );
        warehouse.script(&[(JobState::Running, None)]);
        let app = app(warehouse.clone(), storage.clone());

        let response = app
            .clone()
            .oneshot(get("/api/v1/status?job_id=job_web"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["state"], "RUNNING");

        let response = app
            .clone()
            .oneshot(get("/api/v1/download?job_id=job_web"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["code"], "JOB_NOT_READY");

        warehouse.script(&[(JobState::Succeeded, None)]);
        storage.put("exports", "web/export-000000000000.csv", "id\n1\n");
        storage.put("exports", "web/export-000000000001.csv", "id\n2\n");

        let response = app
            .clone()
            .oneshot(get("/api/v1/download?job_id=job_web&merge=true"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["artifact"]["kind"], "merged");
        assert_eq!(body["merge"]["headers_skipped"], 1);
        assert_eq!(
            body["links"][0]["url"],
            "https://storage.cloud.google.com/exports/web/export-merged.csv"
        );
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let response = default_app()
            .oneshot(get("/api/v1/status?job_id=nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_merge_and_object_link_routes() {
        let storage = Arc::new(FakeStorage::default());
        storage.put("exports", "manual/part-1.csv", "h\n1\n");
        storage.put("exports", "manual/part-2.csv", "h\n2\n");
        let app = app(Arc::new(FakeWarehouse::default()), storage.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/merge",
                json!({
                    "source_prefix": "manual/",
                    "destination_filename": "manual/all.csv",
                    "compress_output": false
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["merged_uri"], "gs://exports/manual/all.csv");
        assert_eq!(storage.get("exports", "manual/all.csv").unwrap(), b"h\n1\n2\n");

        let response = app
            .oneshot(get("/api/v1/download/manual/all.csv"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(
            body["signed_url"],
            "https://storage.cloud.google.com/exports/manual/all.csv"
        );
        assert!(body.get("expires_in").is_none());
    }

    #[tokio::test]
    async fn test_merge_cannot_target_another_bucket() {
        let storage = Arc::new(FakeStorage::default());
        storage.put("payroll", "2024/a-1.csv", "h\n1\n");
        storage.put("payroll", "2024/a-2.csv", "h\n2\n");
        let app = app(Arc::new(FakeWarehouse::default()), storage.clone());

        let response = app
            .oneshot(post_json(
                "/api/v1/merge",
                json!({
                    "source_prefix": "2024/",
                    "destination_filename": "2024/all.csv",
                    "bucket": "payroll"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "INVALID_REQUEST");
        assert!(storage.deleted.lock().unwrap().is_empty());
        assert_eq!(storage.names().len(), 2);
    }
}
