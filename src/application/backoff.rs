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

//! # Backoff
//!
//! Exponential delays shared by job polling and transient-error retries:
//! start at `initial`, multiply by `multiplier` after every attempt, never
//! exceed `max`.

use crate::config::ExportConfig;
use crate::domain::errors::Result;
use log::warn;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.poll_initial_backoff_ms),
            max: Duration::from_millis(config.poll_max_backoff_ms),
            multiplier: config.poll_multiplier.max(1.0),
        }
    }

    /// A fresh, endless sequence of delays.
    pub fn delays(&self) -> Backoff {
        Backoff {
            policy: *self,
            next: self.initial.min(self.max),
        }
    }
}

/// Iterator over the delays of one retry or polling loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    next: Duration,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let grown = current.as_secs_f64() * self.policy.multiplier;
        self.next = if grown >= self.policy.max.as_secs_f64() {
            self.policy.max
        } else {
            Duration::from_secs_f64(grown)
        };
        Some(current)
    }
}

/// Runs `op`, retrying `TransientServiceError`s up to `max_retries` times.
/// Every other error is returned on first sight.
pub async fn retry_transient<T, F, Fut>(
    policy: BackoffPolicy,
    max_retries: u32,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delays = policy.delays();
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let delay = delays.next().unwrap_or(policy.max);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    what, attempt, max_retries, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ExportError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_sequence_caps_at_thirty_seconds() {
        let secs: Vec<u64> = BackoffPolicy::default()
            .delays()
            .take(8)
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_policy_from_config() {
        let config = ExportConfig {
            poll_initial_backoff_ms: 250,
            poll_max_backoff_ms: 1000,
            poll_multiplier: 3.0,
            ..ExportConfig::default()
        };
        let millis: Vec<u128> = BackoffPolicy::from_config(&config)
            .delays()
            .take(3)
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(millis, vec![250, 750, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(BackoffPolicy::default(), 5, "jobs.get", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ExportError::TransientServiceError {
                        status: Some(503),
                        message: "backend error".into(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(BackoffPolicy::default(), 3, "jobs.get", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ExportError::TransientServiceError {
                    status: None,
                    message: "connection reset".into(),
                })
            }
        })
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(BackoffPolicy::default(), 5, "jobs.insert", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ExportError::PermissionDenied("no bigquery.jobs.create".into())) }
        })
        .await;

        assert!(matches!(result, Err(ExportError::PermissionDenied(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
