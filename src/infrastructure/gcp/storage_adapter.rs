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

//! # Cloud Storage Adapter
//!
//! `StoragePort` over the Cloud Storage JSON API. Downloads and uploads are
//! streamed between the network and local files.

use crate::domain::errors::{ExportError, Result};
use crate::infrastructure::gcp::http::{endpoint_url, send, send_json};
use crate::ports::credential_port::CredentialProvider;
use crate::ports::storage_port::{ObjectMeta, StoragePort};
use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

pub struct GcsRestAdapter {
    http: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    bucket: String,
    name: String,
    /// uint64 values arrive as strings.
    size: Option<String>,
}

impl From<ObjectResource> for ObjectMeta {
    fn from(o: ObjectResource) -> Self {
        ObjectMeta {
            bucket: o.bucket,
            name: o.name,
            size_bytes: o.size.and_then(|s| s.parse().ok()).unwrap_or(0),
        }
    }
}

impl GcsRestAdapter {
    pub fn new(
        http: reqwest::Client,
        credentials: Arc<dyn CredentialProvider>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl StoragePort for GcsRestAdapter {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let url = endpoint_url(&self.endpoint, &["storage", "v1", "b", bucket, "o"])?;
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.credentials.access_token().await?;
            let mut request = self
                .http
                .get(url.clone())
                .bearer_auth(token)
                .query(&[("prefix", prefix)]);
            if let Some(t) = &page_token {
                request = request.query(&[("pageToken", t.as_str())]);
            }

            let page: ObjectList = send_json(request).await?;
            objects.extend(page.items.into_iter().map(ObjectMeta::from));

            match page.next_page_token {
                Some(t) if !t.is_empty() => page_token = Some(t),
                _ => break,
            }
        }
        debug!("Listed {} objects under gs://{}/{}", objects.len(), bucket, prefix);
        Ok(objects)
    }

    async fn download_to_file(&self, bucket: &str, name: &str, dest: &Path) -> Result<u64> {
        let url = endpoint_url(&self.endpoint, &["storage", "v1", "b", bucket, "o", name])?;
        let token = self.credentials.access_token().await?;
        let response = send(
            self.http
                .get(url)
                .bearer_auth(token)
                .query(&[("alt", "media")]),
        )
        .await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn upload_from_file(
        &self,
        src: &Path,
        bucket: &str,
        name: &str,
        content_type: &str,
    ) -> Result<ObjectMeta> {
        let url = endpoint_url(
            &self.endpoint,
            &["upload", "storage", "v1", "b", bucket, "o"],
        )?;
        let file = tokio::fs::File::open(src).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let token = self.credentials.access_token().await?;
        let request = self
            .http
            .post(url)
            .bearer_auth(token)
            .query(&[("uploadType", "media"), ("name", name)])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(body);

        let object: ObjectResource = send_json(request).await?;
        Ok(object.into())
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<()> {
        let url = endpoint_url(&self.endpoint, &["storage", "v1", "b", bucket, "o", name])?;
        let token = self.credentials.access_token().await?;
        match send(self.http.delete(url).bearer_auth(token)).await {
            Ok(_) => Ok(()),
            // Already gone is as good as deleted.
            Err(ExportError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::gcp::auth::StaticTokenProvider;
    use serde_json::json;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> GcsRestAdapter {
        GcsRestAdapter::new(
            reqwest::Client::new(),
            Arc::new(StaticTokenProvider::new("test_token")),
            server.uri(),
        )
    }

    #[tokio::test]
    async fn test_list_objects_with_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/exports/o"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    { "bucket": "exports", "name": "run/export-000000000001.csv", "size": "20" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/exports/o"))
            .and(query_param("prefix", "run/export-"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    { "bucket": "exports", "name": "run/export-000000000000.csv", "size": "10" }
                ],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let objects = adapter(&server)
            .list_objects("exports", "run/export-")
            .await
            .unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].size_bytes, 10);
        assert_eq!(objects[1].name, "run/export-000000000001.csv");
    }

    #[tokio::test]
    async fn test_download_streams_to_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/exports/o/run%2Fexport-000000000000.csv"))
            .and(query_param("alt", "media"))
            .and(header("Authorization", "Bearer test_token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("id,name\n1,a\n"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("shard.csv");
        let written = adapter(&server)
            .download_to_file("exports", "run/export-000000000000.csv", &dest)
            .await
            .unwrap();

        assert_eq!(written, 12);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "id,name\n1,a\n");
    }

    #[tokio::test]
    async fn test_upload_sends_file_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/exports/o"))
            .and(query_param("uploadType", "media"))
            .and(query_param("name", "run/merged.csv"))
            .and(header("Content-Type", "text/csv"))
            .and(body_string("id\n1\n"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bucket": "exports", "name": "run/merged.csv", "size": "5"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("merged.csv");
        std::fs::write(&src, "id\n1\n").unwrap();

        let meta = adapter(&server)
            .upload_from_file(&src, "exports", "run/merged.csv", "text/csv")
            .await
            .unwrap();
        assert_eq!(meta.size_bytes, 5);
    }

    #[tokio::test]
    async fn test_delete_missing_object_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/storage/v1/b/exports/o/gone.csv"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(adapter(&server).delete_object("exports", "gone.csv").await.is_ok());
    }

    #[tokio::test]
    async fn test_permission_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/locked/o"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": 403, "message": "caller does not have storage.objects.list access" }
            })))
            .mount(&server)
            .await;

        let err = adapter(&server).list_objects("locked", "").await.unwrap_err();
        assert!(matches!(err, ExportError::PermissionDenied(_)));
    }
}
