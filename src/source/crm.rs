use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use sqlx::PgPool;

use crate::config::SourceMode;
use crate::error::PipelineError;
use crate::models::customer::CustomerProsthesisRow;
use crate::models::CustomerProsthesis;

/// `extract_reference(since) -> stream<CustomerProsthesis>` (spec §4.1).
///
/// Reads the flattened active-prosthesis view, filtered to
/// `greatest(customer.updated_at, prosthesis.updated_at) >= since`, at most
/// one row per `chip_id` (ties broken by greatest `updated_at`, then
/// `prosthesis_id` ascending — expressed here with `DISTINCT ON` over a
/// deterministic `ORDER BY`). `mode` picks between the live CRM tables and
/// the CDC replica; the replica is deduplicated by `replicated_at` instead
/// of `updated_at`, per spec §4.1's "Alternative source".
pub async fn extract_reference(
    pool: &PgPool,
    mode: SourceMode,
    since: DateTime<Utc>,
) -> Result<Vec<CustomerProsthesis>, PipelineError> {
    let sql = match mode {
        SourceMode::Direct => {
            "SELECT DISTINCT ON (chip_id)
                customer_id, external_id, last_name, first_name, middle_name,
                email, region, branch, customer_updated_at,
                prosthesis_id, serial_number, chip_id, status, firmware_version,
                prosthesis_updated_at,
                model_id, model_code, model_name, category, warranty_months, model_is_active
            FROM active_prostheses
            WHERE greatest(customer_updated_at, prosthesis_updated_at) >= $1
            ORDER BY chip_id,
                     greatest(customer_updated_at, prosthesis_updated_at) DESC,
                     prosthesis_id ASC"
        }
        SourceMode::Replica => {
            "SELECT DISTINCT ON (chip_id)
                customer_id, external_id, last_name, first_name, middle_name,
                email, region, branch, customer_updated_at,
                prosthesis_id, serial_number, chip_id, status, firmware_version,
                prosthesis_updated_at,
                model_id, model_code, model_name, category, warranty_months, model_is_active
            FROM crm_replica.active_prostheses
            WHERE greatest(customer_updated_at, prosthesis_updated_at) >= $1
            ORDER BY chip_id, replicated_at DESC, prosthesis_id ASC"
        }
    };

    let mut rows = sqlx::query_as::<_, CustomerProsthesisRow>(sql)
        .bind(since)
        .fetch(pool);

    let mut out = Vec::new();
    loop {
        let row = rows.try_next().await.map_err(PipelineError::from)?;
        let Some(row) = row else { break };
        let cp = CustomerProsthesis::try_from(row)
            .map_err(PipelineError::SchemaMismatch)?;
        out.push(cp);
    }
    Ok(out)
}
