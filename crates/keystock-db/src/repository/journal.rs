//! # Change Journal Repository
//!
//! Read side of the trigger-maintained `change_journal` table. Every insert,
//! update and delete on products, units and the barcode registry appends a
//! row, so the latest sequence number is a cheap "has anything changed"
//! signal for the periodic auditor.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::DbResult;

/// One journal row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct JournalEntry {
    pub seq: i64,
    pub table_name: String,
    pub entity_id: String,
    pub op: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChangeJournalRepository {
    pool: SqlitePool,
}

impl ChangeJournalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ChangeJournalRepository { pool }
    }

    /// Highest sequence number ever issued, 0 before the first change.
    ///
    /// Read from `sqlite_sequence` so pruning never moves it backwards.
    pub async fn latest_seq(&self) -> DbResult<i64> {
        let seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE((SELECT seq FROM sqlite_sequence WHERE name = 'change_journal'), 0)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(seq)
    }

    /// Entries after `seq`, oldest first.
    pub async fn since(&self, seq: i64, limit: u32) -> DbResult<Vec<JournalEntry>> {
        let entries = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT seq, table_name, entity_id, op, changed_at
            FROM change_journal
            WHERE seq > ?1
            ORDER BY seq
            LIMIT ?2
            "#,
        )
        .bind(seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Deletes entries up to and including `seq`. Returns rows removed.
    pub async fn prune_through(&self, seq: i64) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM change_journal WHERE seq <= ?1")
            .bind(seq)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
