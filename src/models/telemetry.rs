use clickhouse::Row;
use serde::{Deserialize, Serialize};

/// One hourly aggregate produced by the upstream telemetry aggregator,
/// keyed by `(chip_id, hour_start)`. Stored in ClickHouse; `hour_start` is
/// serialized as a ClickHouse `DateTime('UTC')`, which the `clickhouse` crate
/// round-trips as a Unix timestamp (`u32` seconds) on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct HourlyTelemetryAggregate {
    pub chip_id: String,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub hour_start: chrono::DateTime<chrono::Utc>,

    pub movements_count: u64,
    pub successful_movements: u64,

    pub avg_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,

    pub avg_battery_level: f64,
    pub min_battery_level: f64,
    pub max_battery_level: f64,

    pub avg_actuator_temp_c: f64,
    pub max_actuator_temp_c: f64,

    pub error_count: u64,
    pub warning_count: u64,

    pub avg_myo_amplitude: f64,
    pub avg_connection_quality: f64,

    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl HourlyTelemetryAggregate {
    /// Range invariants from spec §3/§8: `battery_level`/`connection_quality`
    /// live in `[0, 100]`. A violation signals source corruption and is
    /// `InvalidMetric`, fatal for the row but not the run.
    pub fn has_valid_ranges(&self) -> bool {
        let in_pct = |v: f64| (0.0..=100.0).contains(&v);
        in_pct(self.avg_battery_level)
            && in_pct(self.min_battery_level)
            && in_pct(self.max_battery_level)
            && in_pct(self.avg_connection_quality)
            && self.movements_count >= self.successful_movements
    }
}
