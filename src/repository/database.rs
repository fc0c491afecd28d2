use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared handle to the projection store.
///
/// Every poller and the query tooling go through the same connection; access
/// is serialised by the mutex, so one handler invocation never interleaves
/// with another's statements.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        if db_path != ":memory:" {
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        }
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        create_tables(&conn)?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))?;
        f(&conn)
    }

    /// Runs `f` inside one SQLite transaction; nothing is kept if it fails.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tracked_contracts (
            network_id INTEGER NOT NULL,
            address TEXT NOT NULL,
            protocol TEXT NOT NULL,
            last_filter_block INTEGER NOT NULL,
            name TEXT,
            symbol TEXT,
            owner TEXT,
            logo_uri TEXT,
            is_base INTEGER,
            base_uri TEXT,
            PRIMARY KEY (network_id, address)
        );

        CREATE TABLE IF NOT EXISTS crosschain_addresses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            network_id INTEGER NOT NULL,
            address TEXT NOT NULL,
            peer_network_id INTEGER NOT NULL,
            peer_address TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            address TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS nfts (
            network_id INTEGER NOT NULL,
            collection TEXT NOT NULL,
            token_id TEXT NOT NULL,
            token_uri TEXT NOT NULL,
            creator TEXT NOT NULL,
            latest_listing_id TEXT,
            PRIMARY KEY (network_id, collection, token_id)
        );

        CREATE TABLE IF NOT EXISTS nft_owners (
            network_id INTEGER NOT NULL,
            collection TEXT NOT NULL,
            token_id TEXT NOT NULL,
            owner TEXT NOT NULL,
            amount TEXT NOT NULL,
            PRIMARY KEY (network_id, collection, token_id, owner)
        );

        CREATE TABLE IF NOT EXISTS airdrops (
            network_id INTEGER NOT NULL,
            collection TEXT NOT NULL,
            drop_id TEXT NOT NULL,
            supply TEXT NOT NULL,
            minted TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            price TEXT NOT NULL,
            has_whitelist_phase INTEGER NOT NULL,
            whitelist_end_time TEXT NOT NULL,
            whitelist_price TEXT NOT NULL,
            mint_limit_per_wallet TEXT NOT NULL,
            PRIMARY KEY (network_id, collection, drop_id)
        );

        CREATE TABLE IF NOT EXISTS listings (
            network_id INTEGER NOT NULL,
            listing_id TEXT NOT NULL,
            marketplace TEXT NOT NULL,
            seller TEXT NOT NULL,
            collection TEXT NOT NULL,
            token_id TEXT NOT NULL,
            price TEXT NOT NULL,
            list_amount TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY (network_id, listing_id)
        );

        CREATE TABLE IF NOT EXISTS offers (
            network_id INTEGER NOT NULL,
            listing_id TEXT NOT NULL,
            offer_index TEXT NOT NULL,
            offerer TEXT NOT NULL,
            price TEXT NOT NULL,
            amount TEXT NOT NULL,
            accepted INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (network_id, listing_id, offer_index)
        );

        CREATE TABLE IF NOT EXISTS processed_transactions (
            hash TEXT PRIMARY KEY,
            contract_address TEXT NOT NULL,
            inserted_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ingest_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_crosschain_collection
            ON crosschain_addresses(network_id, address);
        CREATE INDEX IF NOT EXISTS idx_nft_owners_owner
            ON nft_owners(owner);
        CREATE INDEX IF NOT EXISTS idx_listings_collection
            ON listings(network_id, collection, token_id);
        CREATE INDEX IF NOT EXISTS idx_processed_contract
            ON processed_transactions(contract_address);
        CREATE INDEX IF NOT EXISTS idx_ingest_log_created
            ON ingest_log(created_at);",
    )?;
    Ok(())
}
