use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::{PipelineConfig, RetryConfig};
use crate::error::PipelineError;
use crate::invalidator;
use crate::loader;
use crate::lock::RunLock;
use crate::run_store::RunStore;
use crate::source;
use crate::transform;

/// Row counters surfaced from a single completed run, independent of
/// whether it landed in the run store as `Success` or `Failed`.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub rows_extracted: i64,
    pub rows_loaded: i64,
    pub orphan_count: i64,
    pub invalid_metric_count: i64,
    pub users_invalidated: i64,
}

/// Owns the background tick loop (spec §4.6): one `tokio::time::interval`
/// firing at `schedule.period_secs`, the same shape as `rush-api`'s alert
/// and SLO engines, generalized from "evaluate due rules" to "run the ETL
/// DAG once, end to end".
pub struct Scheduler {
    config: PipelineConfig,
    crm_pool: PgPool,
    telemetry_client: clickhouse::Client,
    mart_client: clickhouse::Client,
    http: reqwest::Client,
    run_store: RunStore,
}

impl Scheduler {
    pub fn new(
        config: PipelineConfig,
        crm_pool: PgPool,
        telemetry_client: clickhouse::Client,
        mart_client: clickhouse::Client,
        run_store: RunStore,
    ) -> Self {
        Self {
            config,
            crm_pool,
            telemetry_client,
            mart_client,
            http: reqwest::Client::new(),
            run_store,
        }
    }

    pub fn run_store(&self) -> &RunStore {
        &self.run_store
    }

    /// Runs the tick loop until the process exits. Each tick takes the
    /// single-instance lock, computes a fresh wall-clock window, and runs
    /// the DAG; a tick that finds the lock already held simply logs and
    /// waits for the next one (spec §5: "the loser skips this tick").
    pub async fn run_forever(&self) {
        let mut interval = tokio::time::interval(self.config.schedule.period());
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                tracing::error!("scheduler tick failed: {e}");
            }
        }
    }

    pub async fn tick(&self) -> anyhow::Result<()> {
        let run_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let window_end = truncate_to_minute(now);
        let window_start = window_end - chrono::Duration::from_std(self.config.schedule.lookback())
            .expect("lookback_secs fits in chrono::Duration");

        let lock = match RunLock::try_acquire(&self.crm_pool).await {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                tracing::info!("scheduler: another instance holds the run lock, skipping this tick");
                self.run_store.mark_skipped(
                    &run_id,
                    window_start,
                    window_end,
                    &PipelineError::LockContention.to_string(),
                )?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.run_store.create_run(&run_id, window_start, window_end, now)?;
        tracing::info!(run_id, %window_start, %window_end, "run starting");

        let run_ceiling = self.config.schedule.run_ceiling();
        let outcome = tokio::time::timeout(
            run_ceiling,
            self.run_once(&run_id, window_start, window_end),
        )
        .await;

        let result = match outcome {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PipelineError::RunTimeout(run_ceiling)),
        };

        match &result {
            Ok(outcome) => {
                self.run_store.mark_success(
                    &run_id,
                    Utc::now(),
                    outcome.rows_extracted,
                    outcome.rows_loaded,
                    outcome.orphan_count,
                    outcome.invalid_metric_count,
                    outcome.users_invalidated,
                )?;
                tracing::info!(run_id, ?outcome, "run succeeded");
            }
            Err(e) => {
                self.run_store.mark_failed(&run_id, Utc::now(), &e.to_string())?;
                tracing::error!(run_id, "run failed: {e}");
            }
        }

        lock.release().await?;
        result.map(|_| ()).map_err(Into::into)
    }

    async fn run_once(
        &self,
        run_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<RunOutcome, PipelineError> {
        let (reference, telemetry) = tokio::time::timeout(
            self.config.schedule.extract_timeout(),
            async {
                tokio::try_join!(
                    with_retry(&self.config.retry, "extract_reference", || {
                        // The full active-prosthesis view, not the telemetry
                        // lookback window: `since` here only trims rows that
                        // can't have changed, and a reference row can be
                        // older than `window_start` while its prosthesis is
                        // still active (see DESIGN.md's C1 entry).
                        source::extract_reference(&self.crm_pool, self.config.crm.mode, DateTime::<Utc>::MIN_UTC)
                    }),
                    with_retry(&self.config.retry, "extract_telemetry", || {
                        source::extract_telemetry(&self.telemetry_client, window_start, window_end)
                    }),
                )
            },
        )
        .await
        .map_err(|_| PipelineError::RunTimeout(self.config.schedule.extract_timeout()))??;

        let rows_extracted = (reference.len() + telemetry.len()) as i64;

        let (batch, transform_report) = tokio::time::timeout(
            self.config.schedule.transform_timeout(),
            async { transform::transform(reference, telemetry, Utc::now()) },
        )
        .await
        .map_err(|_| PipelineError::RunTimeout(self.config.schedule.transform_timeout()))?;

        let load_result = tokio::time::timeout(
            self.config.schedule.load_timeout(),
            with_retry(&self.config.retry, "load", || {
                loader::load(&self.mart_client, &batch, self.config.loader.batch_size)
            }),
        )
        .await
        .map_err(|_| PipelineError::RunTimeout(self.config.schedule.load_timeout()))??;

        // Best-effort: invalidation failures are logged and counted, never
        // fail the run (spec §4.5).
        let invalidation = invalidator::invalidate(
            &self.http,
            &self.config.invalidator,
            run_id,
            &load_result.distinct_user_ids,
            self.config.schedule.invalidation_timeout(),
        )
        .await;
        if invalidation.failed > 0 {
            tracing::warn!(
                run_id,
                failed = invalidation.failed,
                "{} user(s) failed cache invalidation",
                invalidation.failed
            );
        }

        Ok(RunOutcome {
            rows_extracted,
            rows_loaded: load_result.inserted_rows as i64,
            orphan_count: transform_report.orphan_count as i64,
            invalid_metric_count: transform_report.invalid_metric_count as i64,
            users_invalidated: invalidation.succeeded as i64,
        })
    }
}

fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
}

/// Retries a fallible async task up to `config.attempts` times with
/// multiplicative backoff, but only while the error is classified
/// `is_retryable()` (spec §7); anything else — including `SchemaMismatch`
/// or `InvalidMetric` surfacing this high — propagates immediately.
async fn with_retry<T, F, Fut>(config: &RetryConfig, task_name: &str, mut f: F) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0;
    let mut backoff = config.backoff_initial();
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt + 1 < config.attempts => {
                attempt += 1;
                tracing::warn!("{task_name}: attempt {attempt} failed ({e}), retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = Duration::from_secs_f64((backoff.as_secs_f64() * config.backoff_factor).max(1.0));
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncate_to_minute_drops_seconds_and_subseconds() {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap() + chrono::Duration::milliseconds(500);
        let truncated = truncate_to_minute(t);
        assert_eq!(truncated, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
    }

    #[tokio::test]
    async fn with_retry_gives_up_immediately_on_non_retryable_error() {
        let config = RetryConfig {
            attempts: 5,
            backoff_initial_secs: 0,
            backoff_factor: 1.0,
        };
        let mut calls = 0;
        let result: Result<(), PipelineError> = with_retry(&config, "test", || {
            calls += 1;
            async { Err(PipelineError::SchemaMismatch("boom".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn with_retry_retries_up_to_configured_attempts() {
        let config = RetryConfig {
            attempts: 3,
            backoff_initial_secs: 0,
            backoff_factor: 1.0,
        };
        let mut calls = 0;
        let result: Result<(), PipelineError> = with_retry(&config, "test", || {
            calls += 1;
            async { Err(PipelineError::SourceUnavailable("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn with_retry_returns_first_success() {
        let config = RetryConfig {
            attempts: 3,
            backoff_initial_secs: 0,
            backoff_factor: 1.0,
        };
        let mut calls = 0;
        let result = with_retry(&config, "test", || {
            calls += 1;
            async move {
                if calls < 2 {
                    Err(PipelineError::SourceUnavailable("down".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }
}
