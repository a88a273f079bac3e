use chrono::{DateTime, Utc};
use clickhouse::Client;

use crate::error::{ch_source_error, PipelineError};
use crate::models::HourlyTelemetryAggregate;

/// `extract_telemetry(window_start, window_end) -> stream<HourlyTelemetryAggregate>`
/// (spec §4.1). Returns every hourly aggregate with `hour_start` in
/// `[window_start, window_end)`. Streamed via ClickHouse's row cursor rather
/// than `fetch_all`, so a wide lookback window doesn't force the whole
/// extract into memory at once.
pub async fn extract_telemetry(
    client: &Client,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<HourlyTelemetryAggregate>, PipelineError> {
    let sql = format!(
        "SELECT chip_id, hour_start, movements_count, successful_movements, \
         avg_response_time_ms, min_response_time_ms, max_response_time_ms, \
         avg_battery_level, min_battery_level, max_battery_level, \
         avg_actuator_temp_c, max_actuator_temp_c, \
         error_count, warning_count, avg_myo_amplitude, avg_connection_quality, \
         updated_at \
         FROM hourly_telemetry_aggregates \
         WHERE hour_start >= toDateTime({}, 'UTC') AND hour_start < toDateTime({}, 'UTC')",
        window_start.timestamp(),
        window_end.timestamp(),
    );

    let mut cursor = client
        .query(&sql)
        .fetch::<HourlyTelemetryAggregate>()
        .map_err(ch_source_error)?;

    let mut out = Vec::new();
    while let Some(row) = cursor.next().await.map_err(ch_source_error)? {
        out.push(row);
    }
    Ok(out)
}
