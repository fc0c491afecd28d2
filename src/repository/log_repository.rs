use super::models::{LogEntry, parse_datetime};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;

/// Operator-facing log of ingestion failures and tick timings.
pub struct LogRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> LogRepository<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn record(&self, kind: &str, content: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ingest_log (kind, content, created_at) VALUES (?1, ?2, ?3)",
            params![kind, content, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn recent(&self, kind: Option<&str>, limit: usize) -> Result<Vec<LogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, content, created_at FROM ingest_log
             WHERE ?1 IS NULL OR kind = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![kind, limit], |row| {
                Ok(LogEntry {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    content: row.get(2)?,
                    created_at: parse_datetime(3, row.get(3)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM ingest_log WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }
}
