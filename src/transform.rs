use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};

use crate::models::{CustomerProsthesis, HourlyTelemetryAggregate, UserProsthesisStat};

/// Row-level counters the scheduler logs and reports alongside the run
/// (spec §7/§8: orphan telemetry and invalid-metric rows are dropped and
/// counted, never surfaced as task failures).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformReport {
    pub orphan_count: u64,
    pub invalid_metric_count: u64,
}

/// The Join/Transform stage (spec §4.2): equi-join telemetry onto reference
/// data by `chip_id`, denormalize, and derive `report_date`/`report_hour`/
/// `success_rate`/`customer_name`. The reference stream is materialized into
/// a `chip_id -> CustomerProsthesis` map first (it is small relative to
/// telemetry — one row per active, chipped prosthesis), then telemetry is
/// enriched in a single pass, matching spec §4.2's "build the mapping, then
/// enrich in a single pass" ordering.
pub fn transform(
    reference: Vec<CustomerProsthesis>,
    telemetry: Vec<HourlyTelemetryAggregate>,
    etl_processed_at: DateTime<Utc>,
) -> (Vec<UserProsthesisStat>, TransformReport) {
    let by_chip: HashMap<String, CustomerProsthesis> = reference
        .into_iter()
        .map(|r| (r.chip_id.clone(), r))
        .collect();

    let mut out = Vec::with_capacity(telemetry.len());
    let mut report = TransformReport::default();

    for t in telemetry {
        let Some(r) = by_chip.get(&t.chip_id) else {
            report.orphan_count += 1;
            tracing::warn!(chip_id = %t.chip_id, "orphan telemetry: no active prosthesis for this chip");
            continue;
        };

        if !t.has_valid_ranges() {
            report.invalid_metric_count += 1;
            tracing::warn!(
                chip_id = %t.chip_id,
                hour_start = %t.hour_start,
                "invalid metric: out-of-range battery/connection-quality or movements invariant violated"
            );
            continue;
        }

        let success_rate = if t.movements_count == 0 {
            0.0
        } else {
            round_half_up(t.successful_movements as f64 / t.movements_count as f64 * 100.0, 2)
        };

        out.push(UserProsthesisStat {
            external_id: r.external_id.clone(),
            prosthesis_id: r.prosthesis_id,
            report_date: t.hour_start.date_naive(),
            report_hour: t.hour_start.hour() as u8,

            customer_id: r.customer_id,
            customer_name: r.customer_name(),
            email: r.email.clone(),
            region: format!("{:?}", r.region).to_lowercase(),
            branch: r.branch.clone(),

            serial_number: r.serial_number.clone(),
            chip_id: r.chip_id.clone(),
            firmware_version: r.firmware_version.clone(),
            model_code: r.model_code.clone(),
            model_name: r.model_name.clone(),
            category: format!("{:?}", r.category).to_lowercase(),

            movements_count: t.movements_count,
            successful_movements: t.successful_movements,
            success_rate,

            avg_response_time_ms: t.avg_response_time_ms,
            min_response_time_ms: t.min_response_time_ms,
            max_response_time_ms: t.max_response_time_ms,

            avg_battery_level: t.avg_battery_level,
            min_battery_level: t.min_battery_level,
            max_battery_level: t.max_battery_level,

            avg_actuator_temp_c: t.avg_actuator_temp_c,
            max_actuator_temp_c: t.max_actuator_temp_c,

            error_count: t.error_count,
            warning_count: t.warning_count,

            avg_myo_amplitude: t.avg_myo_amplitude,
            avg_connection_quality: t.avg_connection_quality,

            etl_processed_at,
            source_updated_at: r.reference_updated_at(),
        });
    }

    (out, report)
}

/// Half-up rounding to `places` decimal digits (spec §4.2: "half-up to
/// declared precision", banker's rounding not required).
fn round_half_up(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::customer::{ProsthesisCategory, ProsthesisStatus, Region};
    use chrono::TimeZone;

    fn reference_row() -> CustomerProsthesis {
        CustomerProsthesis {
            customer_id: 1,
            external_id: "ivan.petrov".into(),
            last_name: "Petrov".into(),
            first_name: "Ivan".into(),
            middle_name: None,
            email: "ivan@example.com".into(),
            region: Region::Russia,
            branch: "moscow".into(),
            customer_updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            prosthesis_id: 10,
            serial_number: "SN-1".into(),
            chip_id: "CHIP-1".into(),
            status: ProsthesisStatus::Active,
            firmware_version: "1.0.0".into(),
            prosthesis_updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            model_id: 100,
            model_code: "ARM-X".into(),
            model_name: "Arm X".into(),
            category: ProsthesisCategory::Arm,
            warranty_months: 24,
            model_is_active: true,
        }
    }

    fn telemetry_row(chip_id: &str, movements: u64, successful: u64) -> HourlyTelemetryAggregate {
        HourlyTelemetryAggregate {
            chip_id: chip_id.to_string(),
            hour_start: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            movements_count: movements,
            successful_movements: successful,
            avg_response_time_ms: 80.0,
            min_response_time_ms: 50.0,
            max_response_time_ms: 120.0,
            avg_battery_level: 70.0,
            min_battery_level: 65.0,
            max_battery_level: 75.0,
            avg_actuator_temp_c: 30.0,
            max_actuator_temp_c: 35.0,
            error_count: 1,
            warning_count: 0,
            avg_myo_amplitude: 0.5,
            avg_connection_quality: 95.0,
            updated_at: Utc.with_ymd_and_hms(2024, 1, 15, 11, 0, 0).unwrap(),
        }
    }

    #[test]
    fn happy_path_one_user_one_hour() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 11, 5, 0).unwrap();
        let (facts, report) = transform(
            vec![reference_row()],
            vec![telemetry_row("CHIP-1", 100, 95)],
            now,
        );

        assert_eq!(report, TransformReport::default());
        assert_eq!(facts.len(), 1);
        let fact = &facts[0];
        assert_eq!(fact.success_rate, 95.00);
        assert_eq!(fact.customer_name, "Petrov Ivan");
        assert_eq!(fact.report_hour, 10);
        assert_eq!(fact.report_date, Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap().date_naive());
    }

    #[test]
    fn zero_movements_yields_zero_success_rate_not_nan() {
        let now = Utc::now();
        let (facts, _) = transform(vec![reference_row()], vec![telemetry_row("CHIP-1", 0, 0)], now);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].success_rate, 0.0);
        assert!(facts[0].success_rate.is_finite());
    }

    #[test]
    fn orphan_telemetry_is_dropped_and_counted() {
        let now = Utc::now();
        let (facts, report) = transform(
            vec![reference_row()],
            vec![telemetry_row("CHIP-UNKNOWN", 10, 9)],
            now,
        );
        assert!(facts.is_empty());
        assert_eq!(report.orphan_count, 1);
        assert_eq!(report.invalid_metric_count, 0);
    }

    #[test]
    fn out_of_range_battery_is_invalid_metric() {
        let now = Utc::now();
        let mut bad = telemetry_row("CHIP-1", 10, 9);
        bad.avg_battery_level = 150.0;
        let (facts, report) = transform(vec![reference_row()], vec![bad], now);
        assert!(facts.is_empty());
        assert_eq!(report.invalid_metric_count, 1);
        assert_eq!(report.orphan_count, 0);
    }

    #[test]
    fn reference_row_without_telemetry_produces_no_fact() {
        let now = Utc::now();
        let (facts, report) = transform(vec![reference_row()], vec![], now);
        assert!(facts.is_empty());
        assert_eq!(report, TransformReport::default());
    }
}
