use super::models::canonical;
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::params;

/// Every address the marketplace has seen acting as holder, seller, buyer or offerer.
pub struct UserRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> UserRepository<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn find_or_create(&self, address: &Address) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO users (address) VALUES (?1)",
            params![canonical(address)],
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }
}
