use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::Mutex;

/// Where a scheduled run sits in the spec §4.6 state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl RunState {
    fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Failed => "failed",
            RunState::Skipped => "skipped",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "running" => RunState::Running,
            "success" => RunState::Success,
            "failed" => RunState::Failed,
            "skipped" => RunState::Skipped,
            _ => RunState::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub state: RunState,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub rows_extracted: i64,
    pub rows_loaded: i64,
    pub orphan_count: i64,
    pub invalid_metric_count: i64,
    pub users_invalidated: i64,
    pub error: Option<String>,
}

/// Embedded run-history store, the scheduler's equivalent of `rush-api`'s
/// `ConfigDb`: a single `rusqlite` file behind a `Mutex<Connection>`, opened
/// once at startup and shared across the process.
pub struct RunStore {
    conn: Mutex<Connection>,
}

impl RunStore {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS runs (
                id                    TEXT PRIMARY KEY,
                state                 TEXT NOT NULL DEFAULT 'pending' CHECK(state IN ('pending','running','success','failed','skipped')),
                window_start          TEXT NOT NULL,
                window_end            TEXT NOT NULL,
                started_at            TEXT NOT NULL,
                finished_at           TEXT,
                rows_extracted        INTEGER NOT NULL DEFAULT 0,
                rows_loaded           INTEGER NOT NULL DEFAULT 0,
                orphan_count          INTEGER NOT NULL DEFAULT 0,
                invalid_metric_count  INTEGER NOT NULL DEFAULT 0,
                users_invalidated     INTEGER NOT NULL DEFAULT 0,
                error                 TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at DESC);
            ",
        )?;
        Ok(())
    }

    pub fn create_run(
        &self,
        id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs (id, state, window_start, window_end, started_at) \
             VALUES (?1, 'running', ?2, ?3, ?4)",
            params![
                id,
                window_start.to_rfc3339(),
                window_end.to_rfc3339(),
                started_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn mark_success(
        &self,
        id: &str,
        finished_at: DateTime<Utc>,
        rows_extracted: i64,
        rows_loaded: i64,
        orphan_count: i64,
        invalid_metric_count: i64,
        users_invalidated: i64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET state = 'success', finished_at = ?2, rows_extracted = ?3, \
             rows_loaded = ?4, orphan_count = ?5, invalid_metric_count = ?6, users_invalidated = ?7 \
             WHERE id = ?1",
            params![
                id,
                finished_at.to_rfc3339(),
                rows_extracted,
                rows_loaded,
                orphan_count,
                invalid_metric_count,
                users_invalidated
            ],
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, id: &str, finished_at: DateTime<Utc>, error: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET state = 'failed', finished_at = ?2, error = ?3 WHERE id = ?1",
            params![id, finished_at.to_rfc3339(), error],
        )?;
        Ok(())
    }

    pub fn mark_skipped(&self, id: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>, reason: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO runs (id, state, window_start, window_end, started_at, finished_at, error) \
             VALUES (?1, 'skipped', ?2, ?3, ?4, ?4, ?5)",
            params![id, window_start.to_rfc3339(), window_end.to_rfc3339(), now, reason],
        )?;
        Ok(())
    }

    pub fn list_recent(&self, limit: i64) -> anyhow::Result<Vec<RunRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, state, window_start, window_end, started_at, finished_at, \
             rows_extracted, rows_loaded, orphan_count, invalid_metric_count, users_invalidated, error \
             FROM runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                let state: String = row.get(1)?;
                let window_start: String = row.get(2)?;
                let window_end: String = row.get(3)?;
                let started_at: String = row.get(4)?;
                let finished_at: Option<String> = row.get(5)?;
                Ok(RunRecord {
                    id: row.get(0)?,
                    state: RunState::from_str(&state),
                    window_start: parse_rfc3339(&window_start),
                    window_end: parse_rfc3339(&window_end),
                    started_at: parse_rfc3339(&started_at),
                    finished_at: finished_at.map(|s| parse_rfc3339(&s)),
                    rows_extracted: row.get(6)?,
                    rows_loaded: row.get(7)?,
                    orphan_count: row.get(8)?,
                    invalid_metric_count: row.get(9)?,
                    users_invalidated: row.get(10)?,
                    error: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Option<RunRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, state, window_start, window_end, started_at, finished_at, \
             rows_extracted, rows_loaded, orphan_count, invalid_metric_count, users_invalidated, error \
             FROM runs WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            let state: String = row.get(1)?;
            let window_start: String = row.get(2)?;
            let window_end: String = row.get(3)?;
            let started_at: String = row.get(4)?;
            let finished_at: Option<String> = row.get(5)?;
            Ok(RunRecord {
                id: row.get(0)?,
                state: RunState::from_str(&state),
                window_start: parse_rfc3339(&window_start),
                window_end: parse_rfc3339(&window_end),
                started_at: parse_rfc3339(&started_at),
                finished_at: finished_at.map(|s| parse_rfc3339(&s)),
                rows_extracted: row.get(6)?,
                rows_loaded: row.get(7)?,
                orphan_count: row.get(8)?,
                invalid_metric_count: row.get(9)?,
                users_invalidated: row.get(10)?,
                error: row.get(11)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> RunStore {
        RunStore::open(":memory:").unwrap()
    }

    #[test]
    fn mark_success_persists_state_and_counters() {
        let store = store();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        store.create_run("run-1", start, end, start).unwrap();
        store.mark_success("run-1", end, 10, 10, 1, 2, 3).unwrap();

        let run = store.get("run-1").unwrap().unwrap();
        assert_eq!(run.state, RunState::Success);
        assert_eq!(run.rows_extracted, 10);
        assert_eq!(run.rows_loaded, 10);
        assert_eq!(run.orphan_count, 1);
        assert_eq!(run.invalid_metric_count, 2);
        assert_eq!(run.users_invalidated, 3);
    }

    #[test]
    fn mark_failed_persists_state_and_error() {
        let store = store();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        store.create_run("run-1", start, end, start).unwrap();
        store.mark_failed("run-1", end, "source unavailable").unwrap();

        let run = store.get("run-1").unwrap().unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.error.as_deref(), Some("source unavailable"));
    }

    #[test]
    fn list_recent_orders_newest_first() {
        let store = store();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        store.create_run("run-1", t0, t1, t0).unwrap();
        store.create_run("run-2", t1, t1, t1).unwrap();

        let recent = store.list_recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "run-2");
    }
}
