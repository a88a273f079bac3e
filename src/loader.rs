use std::collections::HashSet;

use clickhouse::Client;

use crate::error::{ch_target_error, PipelineError};
use crate::models::UserProsthesisStat;

/// `load(batch) -> LoadResult` (spec §4.3): the distinct `external_id`s
/// touched by the run, consumed downstream by the invalidator.
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    pub inserted_rows: u64,
    pub distinct_user_ids: HashSet<String>,
}

/// Batch-insert facts into the mart. Rows are written as-is within a batch
/// (no pre-aggregation, per spec §4.3); `max_batch_size` only bounds how
/// many rows travel in a single ClickHouse insert block — a whole-batch
/// failure partway through still surfaces as `TargetUnavailable`, and the
/// scheduler retries the *entire* extract+transform+load chain wholesale,
/// which is safe because the mart is a version-wins store: re-inserting
/// rows that already landed changes nothing a reader can observe.
pub async fn load(
    client: &Client,
    batch: &[UserProsthesisStat],
    max_batch_size: usize,
) -> Result<LoadResult, PipelineError> {
    let mut result = LoadResult::default();

    for chunk in batch.chunks(max_batch_size.max(1)) {
        let mut insert = client
            .insert("user_prosthesis_stats")
            .map_err(ch_target_error)?;

        for row in chunk {
            insert.write(row).await.map_err(ch_target_error)?;
            result.distinct_user_ids.insert(row.external_id.clone());
        }

        insert.end().await.map_err(ch_target_error)?;
        result.inserted_rows += chunk.len() as u64;
    }

    Ok(result)
}
