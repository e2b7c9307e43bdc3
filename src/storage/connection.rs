//! SQLite connection wrapper: WAL mode, pragmas, transaction helper.

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use super::migrations::run_migrations;
use crate::error::Result;

/// Storage engine wrapping a single SQLite connection behind a mutex. The
/// service runs one process per database file; the mutex is the pool (spec
/// §5, "relational pool: shared process-wide").
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    let _ = std::fs::create_dir_all(parent);
                }
            }
            Connection::open(db_path)?
        };
        Self::configure_pragmas(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Run `f` with the shared connection. Holds the mutex for the duration.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a SQL transaction; commits on `Ok`, rolls back on `Err`.
    /// Used wherever a claim create/retract spans multiple statements.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&rusqlite::Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_runs_migrations() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='memories'",
                    [],
                    |row| row.get(0),
                )?;
                assert_eq!(count, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let storage = Storage::open_in_memory().unwrap();
        let result: Result<()> = storage.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO slot_state (project_id, subject_id, slot, status, updated_at) VALUES ('p','s','slot','active','now')",
                [],
            )?;
            Err(crate::error::AppError::Internal("boom".to_string()))
        });
        assert!(result.is_err());
        storage
            .with_connection(|conn| {
                let count: i64 =
                    conn.query_row("SELECT count(*) FROM slot_state", [], |row| row.get(0))?;
                assert_eq!(count, 0);
                Ok(())
            })
            .unwrap();
    }
}
