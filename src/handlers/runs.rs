use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

/// `GET /runs` — the admin-only window onto run history (spec §4.6's
/// Pending/Running/Success/Failed/Skipped state machine), not a public
/// reporting surface.
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let runs = state
        .scheduler
        .run_store()
        .list_recent(query.limit)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "runs": runs_to_json(&runs) })))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match state
        .scheduler
        .run_store()
        .get(&run_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    {
        Some(run) => Ok(Json(run_to_json(&run))),
        None => Err((StatusCode::NOT_FOUND, format!("no such run: {run_id}"))),
    }
}

/// `POST /runs/trigger` — runs one ETL tick out-of-band, synchronously,
/// returning once it completes. Intended for operator-driven backfills and
/// manual recovery, not for the scheduled path.
pub async fn trigger_run(State(state): State<AppState>) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .scheduler
        .tick()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

fn run_to_json(run: &crate::run_store::RunRecord) -> serde_json::Value {
    serde_json::json!({
        "id": run.id,
        "state": format!("{:?}", run.state).to_lowercase(),
        "window_start": run.window_start,
        "window_end": run.window_end,
        "started_at": run.started_at,
        "finished_at": run.finished_at,
        "rows_extracted": run.rows_extracted,
        "rows_loaded": run.rows_loaded,
        "orphan_count": run.orphan_count,
        "invalid_metric_count": run.invalid_metric_count,
        "users_invalidated": run.users_invalidated,
        "error": run.error,
    })
}

fn runs_to_json(runs: &[crate::run_store::RunRecord]) -> Vec<serde_json::Value> {
    runs.iter().map(run_to_json).collect()
}
