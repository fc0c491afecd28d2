use super::models::canonical;
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::{OptionalExtension, params};

/// Persisted side of the transaction dedup cache.
///
/// Rows carry their insertion time in unix seconds. Rows older than the
/// retention cut-off are treated as absent and purged on start-up.
pub struct ProcessedTxRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> ProcessedTxRepository<'a> {
    const INSERT: &'static str = "INSERT INTO processed_transactions (hash, contract_address, inserted_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (hash) DO UPDATE SET inserted_at = excluded.inserted_at";

    const EXISTS: &'static str =
        "SELECT 1 FROM processed_transactions WHERE hash = ?1 AND inserted_at >= ?2";

    const SELECT_BY_CONTRACT: &'static str = "SELECT hash FROM processed_transactions
        WHERE contract_address = ?1 AND inserted_at >= ?2
        ORDER BY inserted_at, rowid";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, contract: &Address, hash: &str, inserted_at: i64) -> Result<()> {
        self.conn
            .execute(Self::INSERT, params![hash, canonical(contract), inserted_at])?;
        Ok(())
    }

    pub fn exists(&self, hash: &str, not_before: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(Self::EXISTS, params![hash, not_before], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn delete(&self, hash: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM processed_transactions WHERE hash = ?1",
            params![hash],
        )?;
        Ok(())
    }

    /// Hashes recorded for a contract, oldest first.
    pub fn hashes_for(&self, contract: &Address, not_before: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(Self::SELECT_BY_CONTRACT)?;
        let hashes = stmt
            .query_map(params![canonical(contract), not_before], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(hashes)
    }

    pub fn purge_older_than(&self, cutoff: i64) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM processed_transactions WHERE inserted_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}
