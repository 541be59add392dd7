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

//! # Download URL Issuer
//!
//! Turns a finished export's artifact into URLs a browser can fetch. Two
//! strategies are supported:
//! 1. **Authenticated**: `storage.cloud.google.com` links. They never expire
//!    and only work for callers whose own identity can read the object.
//! 2. **Signed**: V4 signed URLs (`GOOG4-RSA-SHA256`). The string-to-sign is
//!    signed by a service account through IAM `signBlob`, so no private key
//!    is ever loaded. Expiry is enforced by Cloud Storage.
//!
//! Nothing is stored: every call derives fresh URLs from the artifact.

use crate::config::MAX_SIGNED_URL_EXPIRY_SECS;
use crate::domain::destination::GcsUri;
use crate::domain::entities::{DownloadArtifact, DownloadLink};
use crate::domain::errors::Result;
use crate::ports::credential_port::BlobSigner;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const AUTHENTICATED_BASE: &str = "https://storage.cloud.google.com";
const SIGNED_HOST: &str = "storage.googleapis.com";
const SIGNING_ALGORITHM: &str = "GOOG4-RSA-SHA256";

enum Strategy {
    Authenticated,
    Signed {
        signer: Arc<dyn BlobSigner>,
        expiry_secs: u64,
    },
}

pub struct DownloadUrlIssuer {
    strategy: Strategy,
}

impl DownloadUrlIssuer {
    pub fn authenticated() -> Self {
        Self {
            strategy: Strategy::Authenticated,
        }
    }

    /// `expiry_secs` is clamped to what Cloud Storage accepts (1s to 7 days).
    pub fn signed(signer: Arc<dyn BlobSigner>, expiry_secs: u64) -> Self {
        Self {
            strategy: Strategy::Signed {
                signer,
                expiry_secs: expiry_secs.clamp(1, MAX_SIGNED_URL_EXPIRY_SECS),
            },
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self.strategy, Strategy::Signed { .. })
    }

    /// One link per object in the artifact, in artifact order.
    pub async fn issue(&self, artifact: &DownloadArtifact) -> Result<Vec<DownloadLink>> {
        self.issue_at(artifact, Utc::now()).await
    }

    pub async fn issue_at(
        &self,
        artifact: &DownloadArtifact,
        now: DateTime<Utc>,
    ) -> Result<Vec<DownloadLink>> {
        match artifact {
            DownloadArtifact::Merged { uri, size_bytes } => {
                let link = self.link(&GcsUri::parse(uri)?, *size_bytes, now).await?;
                Ok(vec![link])
            }
            DownloadArtifact::Shards { shards } => {
                let mut links = Vec::with_capacity(shards.len());
                for shard in shards {
                    let uri = GcsUri::new(shard.bucket.as_str(), shard.name.as_str());
                    links.push(self.link(&uri, shard.size_bytes, now).await?);
                }
                Ok(links)
            }
        }
    }

    async fn link(&self, uri: &GcsUri, size_bytes: u64, now: DateTime<Utc>) -> Result<DownloadLink> {
        let path = object_path(uri);
        match &self.strategy {
            Strategy::Authenticated => Ok(DownloadLink {
                uri: uri.to_string(),
                url: format!("{}{}", AUTHENTICATED_BASE, path),
                size_bytes,
                expires_at: None,
            }),
            Strategy::Signed {
                signer,
                expiry_secs,
            } => {
                let url = sign_v4(signer.as_ref(), &path, *expiry_secs, now).await?;
                Ok(DownloadLink {
                    uri: uri.to_string(),
                    url,
                    size_bytes,
                    expires_at: Some(now + chrono::Duration::seconds(*expiry_secs as i64)),
                })
            }
        }
    }
}

/// `/bucket/object`, with the object percent-encoded but its `/` kept.
fn object_path(uri: &GcsUri) -> String {
    format!(
        "/{}/{}",
        percent_encode(&uri.bucket, false),
        percent_encode(&uri.object, true)
    )
}

/// RFC 3986 encoding: everything but unreserved characters is escaped.
fn percent_encode(input: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

async fn sign_v4(
    signer: &dyn BlobSigner,
    path: &str,
    expiry_secs: u64,
    now: DateTime<Utc>,
) -> Result<String> {
    let datetime = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{}/auto/storage/goog4_request", date);
    let credential = format!("{}/{}", signer.service_account_email(), scope);

    // Parameters must be sorted by name.
    let query = [
        ("X-Goog-Algorithm", SIGNING_ALGORITHM.to_string()),
        ("X-Goog-Credential", credential),
        ("X-Goog-Date", datetime.clone()),
        ("X-Goog-Expires", expiry_secs.to_string()),
        ("X-Goog-SignedHeaders", "host".to_string()),
    ]
    .iter()
    .map(|(k, v)| format!("{}={}", k, percent_encode(v, false)))
    .collect::<Vec<_>>()
    .join("&");

    let canonical_request = format!(
        "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
        path, query, SIGNED_HOST
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        SIGNING_ALGORITHM,
        datetime,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let signature = signer.sign_blob(string_to_sign.as_bytes()).await?;
    Ok(format!(
        "https://{}{}?{}&X-Goog-Signature={}",
        SIGNED_HOST,
        path,
        query,
        hex::encode(signature)
    ))
}
