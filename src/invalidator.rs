use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;

use crate::config::InvalidatorConfig;

/// Outcome of a fan-out invalidation pass. Best-effort (spec §4.5/§7): never
/// propagated as a run failure, only logged and counted.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidationOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

/// For each `external_id` the loader touched, POST
/// `{user_id, invalidate_scopes: [list, summary, daily]}` to the configured
/// endpoint, with idempotency token `{run_id}:{user_id}` (spec §4.5).
/// Per-user calls fan out with bounded parallelism (`parallelism`, default
/// 8, via a semaphore — the same bounded-concurrency shape as the rest of
/// the crate's background engines, generalized from "one task" to "one task
/// per user"). When the touched set exceeds `bulk_threshold`, a single
/// endpoint-wide call substitutes for the per-user fan-out.
pub async fn invalidate(
    http: &reqwest::Client,
    config: &InvalidatorConfig,
    run_id: &str,
    user_ids: &HashSet<String>,
    per_invalidation_timeout: Duration,
) -> InvalidationOutcome {
    let Some(endpoint) = config.endpoint.as_deref() else {
        tracing::info!("invalidator: no endpoint configured, skipping {} user(s)", user_ids.len());
        return InvalidationOutcome::default();
    };

    if user_ids.is_empty() {
        return InvalidationOutcome::default();
    }

    if user_ids.len() > config.bulk_threshold {
        return invalidate_bulk(http, endpoint, run_id, user_ids.len(), per_invalidation_timeout).await;
    }

    let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
    let mut tasks = Vec::with_capacity(user_ids.len());

    for user_id in user_ids.iter().cloned() {
        let semaphore = semaphore.clone();
        let http = http.clone();
        let endpoint = endpoint.to_string();
        let run_id = run_id.to_string();
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            invalidate_one(&http, &endpoint, &run_id, &user_id, per_invalidation_timeout).await
        }));
    }

    let mut outcome = InvalidationOutcome::default();
    for task in tasks {
        match task.await {
            Ok(Ok(())) => outcome.succeeded += 1,
            Ok(Err(e)) => {
                tracing::warn!("invalidation failed: {e}");
                outcome.failed += 1;
            }
            Err(join_err) => {
                tracing::warn!("invalidation task panicked: {join_err}");
                outcome.failed += 1;
            }
        }
    }
    outcome
}

async fn invalidate_one(
    http: &reqwest::Client,
    endpoint: &str,
    run_id: &str,
    user_id: &str,
    timeout: Duration,
) -> Result<(), String> {
    let payload = json!({
        "user_id": user_id,
        "invalidate_scopes": ["list", "summary", "daily"],
    });
    let idempotency_token = format!("{run_id}:{user_id}");

    let resp = http
        .post(endpoint)
        .timeout(timeout)
        .header("Idempotency-Key", idempotency_token)
        .json(&payload)
        .send()
        .await
        .map_err(|e| format!("user {user_id}: {e}"))?;

    if !resp.status().is_success() {
        return Err(format!("user {user_id}: endpoint returned {}", resp.status()));
    }
    Ok(())
}

async fn invalidate_bulk(
    http: &reqwest::Client,
    endpoint: &str,
    run_id: &str,
    user_count: usize,
    timeout: Duration,
) -> InvalidationOutcome {
    tracing::info!(
        "invalidator: {} users exceeds bulk_threshold, issuing one endpoint-wide invalidation",
        user_count
    );
    let payload = json!({
        "invalidate_scopes": ["list", "summary", "daily"],
        "bulk": true,
    });
    let idempotency_token = format!("{run_id}:bulk");

    let result = http
        .post(endpoint)
        .timeout(timeout)
        .header("Idempotency-Key", idempotency_token)
        .json(&payload)
        .send()
        .await;

    match result {
        Ok(resp) if resp.status().is_success() => InvalidationOutcome {
            succeeded: user_count,
            failed: 0,
        },
        Ok(resp) => {
            tracing::warn!("bulk invalidation returned {}", resp.status());
            InvalidationOutcome {
                succeeded: 0,
                failed: user_count,
            }
        }
        Err(e) => {
            tracing::warn!("bulk invalidation failed: {e}");
            InvalidationOutcome {
                succeeded: 0,
                failed: user_count,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_endpoint_configured_is_a_no_op() {
        let config = InvalidatorConfig {
            endpoint: None,
            parallelism: 8,
            bulk_threshold: 1000,
        };
        let http = reqwest::Client::new();
        let users: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let outcome = invalidate(&http, &config, "run-1", &users, Duration::from_secs(5)).await;
        assert_eq!(outcome.succeeded, 0);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn empty_user_set_is_a_no_op() {
        let config = InvalidatorConfig {
            endpoint: Some("http://localhost:1/invalidate".to_string()),
            parallelism: 8,
            bulk_threshold: 1000,
        };
        let http = reqwest::Client::new();
        let outcome = invalidate(&http, &config, "run-1", &HashSet::new(), Duration::from_secs(5)).await;
        assert_eq!(outcome.succeeded, 0);
        assert_eq!(outcome.failed, 0);
    }
}
