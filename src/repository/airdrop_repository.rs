use super::models::{Airdrop, canonical, parse_address, parse_datetime, parse_u256};
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::params;

pub struct AirdropRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> AirdropRepository<'a> {
    const INSERT_AIRDROP: &'static str = "INSERT OR IGNORE INTO airdrops (
            network_id, collection, drop_id, supply, minted, start_time, end_time, price,
            has_whitelist_phase, whitelist_end_time, whitelist_price, mint_limit_per_wallet
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

    const SELECT_BY_COLLECTION: &'static str = "SELECT network_id, collection, drop_id, supply,
            minted, start_time, end_time, price, has_whitelist_phase, whitelist_end_time,
            whitelist_price, mint_limit_per_wallet
        FROM airdrops WHERE network_id = ?1 AND collection = ?2
        ORDER BY length(drop_id), drop_id";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, drop: &Airdrop) -> Result<bool> {
        let inserted = self.conn.execute(
            Self::INSERT_AIRDROP,
            params![
                drop.network_id,
                canonical(&drop.collection),
                drop.drop_id.to_string(),
                drop.supply.to_string(),
                drop.minted.to_string(),
                drop.start_time.to_rfc3339(),
                drop.end_time.to_rfc3339(),
                drop.price.to_string(),
                drop.has_whitelist_phase,
                drop.whitelist_end_time.to_rfc3339(),
                drop.whitelist_price.to_string(),
                drop.mint_limit_per_wallet.to_string(),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn list_by_collection(&self, network_id: u64, collection: &Address) -> Result<Vec<Airdrop>> {
        let mut stmt = self.conn.prepare(Self::SELECT_BY_COLLECTION)?;
        let drops = stmt
            .query_map(params![network_id, canonical(collection)], |row| {
                Ok(Airdrop {
                    network_id: row.get(0)?,
                    collection: parse_address(1, row.get(1)?)?,
                    drop_id: parse_u256(2, row.get(2)?)?,
                    supply: parse_u256(3, row.get(3)?)?,
                    minted: parse_u256(4, row.get(4)?)?,
                    start_time: parse_datetime(5, row.get(5)?)?,
                    end_time: parse_datetime(6, row.get(6)?)?,
                    price: parse_u256(7, row.get(7)?)?,
                    has_whitelist_phase: row.get(8)?,
                    whitelist_end_time: parse_datetime(9, row.get(9)?)?,
                    whitelist_price: parse_u256(10, row.get(10)?)?,
                    mint_limit_per_wallet: parse_u256(11, row.get(11)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(drops)
    }
}
