//! Run history used to promote persistent ERROR results to BROKEN

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::check::state::{SourceState, Status};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Consecutive ERROR counts per (manifest, source id)
pub struct History {
    conn: Mutex<Connection>,
    promote_after: u32,
}

impl History {
    /// Opens (or creates) the database; `promote_after` errors in a row make a source BROKEN
    pub fn open(db_path: &Path, promote_after: u32) -> Result<Self, HistoryError> {
        info!("Opening run history at {:?}", db_path);

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let history = Self {
            conn: Mutex::new(conn),
            promote_after: promote_after.max(1),
        };
        history.create_schema()?;
        Ok(history)
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, HistoryError> {
        self.conn.lock().map_err(|_| HistoryError::LockPoisoned)
    }

    fn create_schema(&self) -> Result<(), HistoryError> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS error_streaks (
                manifest TEXT NOT NULL,
                source_id TEXT NOT NULL,
                count INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (manifest, source_id)
            )
            "#,
            [],
        )?;
        Ok(())
    }

    /// Records this run's results and promotes long ERROR streaks to BROKEN in place
    pub fn record(&self, manifest: &str, states: &mut [SourceState]) -> Result<(), HistoryError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().timestamp_millis();

        for state in states.iter_mut() {
            if state.status != Status::Error {
                let cleared = tx.execute(
                    "DELETE FROM error_streaks WHERE manifest = ?1 AND source_id = ?2",
                    params![manifest, state.source_id],
                )?;
                if cleared > 0 {
                    debug!("{}: error streak reset", state.name());
                }
                continue;
            }

            tx.execute(
                r#"
                INSERT INTO error_streaks (manifest, source_id, count, updated_at)
                VALUES (?1, ?2, 1, ?3)
                ON CONFLICT(manifest, source_id)
                DO UPDATE SET count = count + 1, updated_at = excluded.updated_at
                "#,
                params![manifest, state.source_id, now],
            )?;
            let count: u32 = tx.query_row(
                "SELECT count FROM error_streaks WHERE manifest = ?1 AND source_id = ?2",
                params![manifest, state.source_id],
                |row| row.get(0),
            )?;

            if count >= self.promote_after {
                warn!("{}: {} consecutive errors, reporting as BROKEN", state.name(), count);
                state.status = Status::Broken;
                state.cause = Some(format!(
                    "{} ({} consecutive errors)",
                    state.cause.as_deref().unwrap_or("check failed"),
                    count
                ));
            }
        }

        tx.commit()?;
        Ok(())
    }
}
