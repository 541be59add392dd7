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

//! Bearer-token authentication for `/api/` routes.

use crate::domain::errors::ExportError;
use crate::server::error::ApiError;
use crate::server::AppState;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use log::debug;
use std::sync::Arc;

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Rejects requests without a valid token. The resolved `TokenInfo` is
/// attached to the request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(verifier) = &state.verifier else {
        return next.run(req).await;
    };

    let token = match bearer_token(req.headers()) {
        Some(t) => t.to_string(),
        None => {
            return ApiError::Unauthorized("Missing or invalid Authorization header".to_string())
                .into_response()
        }
    };

    match verifier.verify(&token).await {
        Ok(info) => {
            debug!(
                "Authenticated {} for {}",
                info.email.as_deref().unwrap_or("<unknown>"),
                req.uri().path()
            );
            req.extensions_mut().insert(info);
            next.run(req).await
        }
        Err(e @ ExportError::TransientServiceError { .. }) => ApiError::Export(e).into_response(),
        Err(ExportError::PermissionDenied(message)) => {
            ApiError::Unauthorized(message).into_response()
        }
        Err(e) => ApiError::Unauthorized(e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer  xyz"));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
