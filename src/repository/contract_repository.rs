use super::models::{
    CollectionMetadata, CrosschainAddress, Protocol, TrackedContract, canonical, parse_address,
};
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

pub struct ContractRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> ContractRepository<'a> {
    const INSERT_CONTRACT: &'static str = "INSERT OR IGNORE INTO tracked_contracts (
            network_id, address, protocol, last_filter_block,
            name, symbol, owner, logo_uri, is_base, base_uri
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

    const SELECT_CONTRACT: &'static str = "SELECT network_id, address, protocol, last_filter_block,
            name, symbol, owner, logo_uri, is_base, base_uri
        FROM tracked_contracts";

    // The watermark never moves backwards, whoever writes it.
    const ADVANCE_LAST_FILTER_BLOCK: &'static str = "UPDATE tracked_contracts
        SET last_filter_block = MAX(last_filter_block, ?1)
        WHERE network_id = ?2 AND address = ?3";

    const GET_LAST_FILTER_BLOCK: &'static str =
        "SELECT last_filter_block FROM tracked_contracts WHERE network_id = ?1 AND address = ?2";

    const SET_BASE_URI: &'static str =
        "UPDATE tracked_contracts SET base_uri = ?1 WHERE network_id = ?2 AND address = ?3";

    const INSERT_CROSSCHAIN: &'static str = "INSERT INTO crosschain_addresses
        (network_id, address, peer_network_id, peer_address) VALUES (?1, ?2, ?3, ?4)";

    const SELECT_CROSSCHAIN: &'static str = "SELECT peer_network_id, peer_address
        FROM crosschain_addresses WHERE network_id = ?1 AND address = ?2 ORDER BY id";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Inserts the contract unless one is already tracked under the same key.
    pub fn insert(&self, contract: &TrackedContract) -> Result<()> {
        let metadata = contract.metadata.as_ref();
        self.conn.execute(
            Self::INSERT_CONTRACT,
            params![
                contract.network_id,
                canonical(&contract.address),
                contract.protocol.as_str(),
                contract.last_filter_block,
                metadata.map(|m| m.name.clone()),
                metadata.map(|m| m.symbol.clone()),
                metadata.map(|m| canonical(&m.owner)),
                metadata.map(|m| m.logo_uri.clone()),
                metadata.map(|m| m.is_base),
                contract.base_uri,
            ],
        )?;
        Ok(())
    }

    pub fn find(&self, network_id: u64, address: &Address) -> Result<Option<TrackedContract>> {
        let query = format!("{} WHERE network_id = ?1 AND address = ?2", Self::SELECT_CONTRACT);
        let contract = self
            .conn
            .query_row(&query, params![network_id, canonical(address)], Self::row_to_contract)
            .optional()?;
        Ok(contract)
    }

    pub fn list(&self) -> Result<Vec<TrackedContract>> {
        let query = format!("{} ORDER BY network_id, address", Self::SELECT_CONTRACT);
        let mut stmt = self.conn.prepare(&query)?;
        let contracts = stmt
            .query_map([], Self::row_to_contract)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contracts)
    }

    pub fn get_last_filter_block(&self, network_id: u64, address: &Address) -> Result<Option<u64>> {
        let block: Option<u64> = self
            .conn
            .query_row(
                Self::GET_LAST_FILTER_BLOCK,
                params![network_id, canonical(address)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(block)
    }

    pub fn advance_last_filter_block(
        &self,
        network_id: u64,
        address: &Address,
        block_number: u64,
    ) -> Result<()> {
        self.conn.execute(
            Self::ADVANCE_LAST_FILTER_BLOCK,
            params![block_number, network_id, canonical(address)],
        )?;
        Ok(())
    }

    pub fn set_base_uri(&self, network_id: u64, address: &Address, base_uri: &str) -> Result<()> {
        self.conn.execute(
            Self::SET_BASE_URI,
            params![base_uri, network_id, canonical(address)],
        )?;
        Ok(())
    }

    pub fn push_crosschain_address(
        &self,
        network_id: u64,
        address: &Address,
        peer: &CrosschainAddress,
    ) -> Result<()> {
        self.conn.execute(
            Self::INSERT_CROSSCHAIN,
            params![
                network_id,
                canonical(address),
                peer.peer_network_id,
                canonical(&peer.peer_address)
            ],
        )?;
        Ok(())
    }

    pub fn crosschain_addresses(
        &self,
        network_id: u64,
        address: &Address,
    ) -> Result<Vec<CrosschainAddress>> {
        let mut stmt = self.conn.prepare(Self::SELECT_CROSSCHAIN)?;
        let peers = stmt
            .query_map(params![network_id, canonical(address)], |row| {
                Ok(CrosschainAddress {
                    peer_network_id: row.get(0)?,
                    peer_address: parse_address(1, row.get(1)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(peers)
    }

    fn row_to_contract(row: &Row) -> rusqlite::Result<TrackedContract> {
        let protocol_str: String = row.get(2)?;
        let protocol = protocol_str.parse::<Protocol>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?;

        let owner: Option<String> = row.get(6)?;
        let metadata = match owner {
            Some(owner) => Some(CollectionMetadata {
                owner: parse_address(6, owner)?,
                name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                symbol: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                logo_uri: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                is_base: row.get::<_, Option<bool>>(8)?.unwrap_or(false),
            }),
            None => None,
        };

        Ok(TrackedContract {
            network_id: row.get(0)?,
            address: parse_address(1, row.get(1)?)?,
            protocol,
            last_filter_block: row.get(3)?,
            metadata,
            base_uri: row.get(9)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Database;
    use alloy_primitives::address;

    fn marketplace(block: u64) -> TrackedContract {
        TrackedContract {
            network_id: 5,
            address: address!("0x00000000000000000000000000000000000000AA"),
            protocol: Protocol::Marketplace,
            last_filter_block: block,
            metadata: None,
            base_uri: None,
        }
    }

    #[test]
    fn insert_is_idempotent_and_keeps_the_first_row() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = ContractRepository::new(conn);
            repo.insert(&marketplace(100))?;
            repo.insert(&marketplace(500))?;
            let found = repo.find(5, &marketplace(0).address)?.unwrap();
            assert_eq!(found.last_filter_block, 100);
            assert_eq!(repo.list()?.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = ContractRepository::new(conn);
            let contract = marketplace(100);
            repo.insert(&contract)?;
            repo.advance_last_filter_block(5, &contract.address, 130)?;
            repo.advance_last_filter_block(5, &contract.address, 110)?;
            assert_eq!(repo.get_last_filter_block(5, &contract.address)?, Some(130));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn collection_metadata_round_trips() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = ContractRepository::new(conn);
            let contract = TrackedContract {
                protocol: Protocol::Erc1155,
                metadata: Some(CollectionMetadata {
                    owner: address!("0x00000000000000000000000000000000000000B0"),
                    name: "Shards".into(),
                    symbol: "SHD".into(),
                    logo_uri: "ipfs://logo".into(),
                    is_base: true,
                }),
                ..marketplace(7)
            };
            repo.insert(&contract)?;
            assert_eq!(repo.find(5, &contract.address)?, Some(contract));
            Ok(())
        })
        .unwrap();
    }
}
