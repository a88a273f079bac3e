use chrono::NaiveDate;
use clickhouse::Client;

use crate::error::{ch_source_error, PipelineError};
use crate::models::{DailyReport, UserSummary};

/// `DailyReport(external_id, report_date)` (spec §4.4), read straight off
/// the `daily_report` view created by `crate::migrations::run_mart`.
pub async fn daily_report(
    client: &Client,
    external_id: &str,
    report_date: NaiveDate,
) -> Result<Option<DailyReport>, PipelineError> {
    let sql = "SELECT ?fields FROM daily_report WHERE external_id = ? AND report_date = ?";
    let row = client
        .query(sql)
        .bind(external_id)
        .bind(report_date)
        .fetch_optional::<DailyReport>()
        .await
        .map_err(ch_source_error)?;
    Ok(row)
}

/// `UserSummary(external_id)` (spec §4.4), read off the `user_summary` view.
pub async fn user_summary(
    client: &Client,
    external_id: &str,
) -> Result<Option<UserSummary>, PipelineError> {
    let sql = "SELECT ?fields FROM user_summary WHERE external_id = ?";
    let row = client
        .query(sql)
        .bind(external_id)
        .fetch_optional::<UserSummary>()
        .await
        .map_err(ch_source_error)?;
    Ok(row)
}
