//! Versioned schema migrations, gated on a `schema_version` table.

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;

    let current: i64 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    if current < 1 {
        migrate_v1(conn)?;
    }

    if current == 0 {
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [SCHEMA_VERSION])?;
    } else if current < SCHEMA_VERSION {
        conn.execute("UPDATE schema_version SET version = ?1", [SCHEMA_VERSION])?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memories (
            id                  TEXT PRIMARY KEY,
            project_id          TEXT NOT NULL,
            subject_id          TEXT NOT NULL,
            text                TEXT NOT NULL,
            kind                TEXT NOT NULL,
            visibility          TEXT NOT NULL,
            importance          INTEGER NOT NULL,
            confidence          REAL NOT NULL,
            is_temporal         INTEGER NOT NULL,
            tags                TEXT NOT NULL,
            metadata            TEXT NOT NULL,
            embedding           BLOB,
            status              TEXT NOT NULL,
            superseded_by       TEXT,
            is_deleted          INTEGER NOT NULL,
            source_type         TEXT NOT NULL,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL,
            last_reinforced_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memories_subject ON memories (project_id, subject_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_memories_status ON memories (project_id, subject_id, status, is_deleted);

        CREATE TABLE IF NOT EXISTS claims (
            claim_id            TEXT PRIMARY KEY,
            project_id          TEXT NOT NULL,
            subject_id          TEXT NOT NULL,
            predicate           TEXT NOT NULL,
            object_value        TEXT NOT NULL,
            slot                TEXT NOT NULL,
            claim_type          TEXT NOT NULL,
            confidence          REAL NOT NULL,
            importance          REAL NOT NULL,
            tags                TEXT NOT NULL,
            source_memory_id    TEXT,
            subject_entity      TEXT NOT NULL,
            status              TEXT NOT NULL,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL,
            valid_from          TEXT,
            valid_until         TEXT,
            retracted_at        TEXT,
            retract_reason      TEXT,
            embedding           BLOB
        );
        CREATE INDEX IF NOT EXISTS idx_claims_slot ON claims (project_id, subject_id, slot, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_claims_status ON claims (project_id, subject_id, status);

        CREATE TABLE IF NOT EXISTS claim_assertions (
            assertion_id        TEXT PRIMARY KEY,
            claim_id            TEXT NOT NULL REFERENCES claims(claim_id) ON DELETE CASCADE,
            memory_id           TEXT,
            object_type         TEXT NOT NULL,
            value_string        TEXT,
            value_number        REAL,
            value_date          TEXT,
            value_json          TEXT,
            confidence          REAL NOT NULL,
            status              TEXT NOT NULL,
            first_seen_at       TEXT NOT NULL,
            last_seen_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_assertions_claim ON claim_assertions (claim_id);

        CREATE TABLE IF NOT EXISTS claim_edges (
            edge_id             TEXT PRIMARY KEY,
            project_id          TEXT NOT NULL,
            from_claim_id       TEXT NOT NULL,
            to_claim_id         TEXT NOT NULL,
            edge_type           TEXT NOT NULL,
            weight              REAL NOT NULL,
            reason_code         TEXT,
            reason_text         TEXT,
            created_at          TEXT NOT NULL,
            UNIQUE (project_id, from_claim_id, to_claim_id, edge_type)
        );
        CREATE INDEX IF NOT EXISTS idx_edges_from ON claim_edges (project_id, from_claim_id);
        CREATE INDEX IF NOT EXISTS idx_edges_to ON claim_edges (project_id, to_claim_id);

        CREATE TABLE IF NOT EXISTS slot_state (
            project_id          TEXT NOT NULL,
            subject_id          TEXT NOT NULL,
            slot                TEXT NOT NULL,
            active_claim_id     TEXT,
            status              TEXT NOT NULL,
            replaced_by_claim_id TEXT,
            updated_at          TEXT NOT NULL,
            PRIMARY KEY (project_id, subject_id, slot)
        );

        CREATE TABLE IF NOT EXISTS memory_recall_events (
            recall_id           TEXT PRIMARY KEY,
            project_id          TEXT NOT NULL,
            memory_id           TEXT NOT NULL,
            subject_id          TEXT NOT NULL,
            chat_id             TEXT NOT NULL,
            message_index       INTEGER NOT NULL,
            similarity_score    REAL NOT NULL,
            request_type        TEXT NOT NULL,
            model_id            TEXT,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_recalls_chat ON memory_recall_events (project_id, chat_id, created_at ASC);
        CREATE INDEX IF NOT EXISTS idx_recalls_memory ON memory_recall_events (project_id, memory_id, created_at DESC);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn tables_exist_after_migration() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        for table in [
            "memories",
            "claims",
            "claim_assertions",
            "claim_edges",
            "slot_state",
            "memory_recall_events",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
