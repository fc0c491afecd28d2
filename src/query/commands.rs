use crate::query::formatters::{
    OutputFormat, format_airdrops, format_contracts, format_listings, format_logs, format_offers,
    format_tokens,
};
use crate::repository::{
    AirdropRepository, ContractRepository, ListingRepository, ListingStatus, LogRepository,
    NftRepository,
};
use alloy_primitives::{Address, U256};
use anyhow::Result;
use rusqlite::Connection;
use std::str::FromStr;

fn parse_address(value: &str) -> Result<Address> {
    Address::from_str(value).map_err(|_| anyhow::anyhow!("Invalid address format: {}", value))
}

fn parse_amount(value: &str) -> Result<U256> {
    U256::from_str(value).map_err(|_| anyhow::anyhow!("Invalid number: {}", value))
}

pub fn cmd_contracts(conn: &Connection, format: &OutputFormat) -> Result<String> {
    let repo = ContractRepository::new(conn);
    let contracts = repo
        .list()?
        .into_iter()
        .map(|contract| {
            let peers = repo.crosschain_addresses(contract.network_id, &contract.address)?;
            Ok((contract, peers))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(format_contracts(&contracts, format))
}

pub struct TokenQuery {
    pub network_id: u64,
    pub collection: String,
    pub limit: usize,
    pub offset: usize,
}

pub fn cmd_tokens(conn: &Connection, query: TokenQuery, format: &OutputFormat) -> Result<String> {
    let collection = parse_address(&query.collection)?;
    let repo = NftRepository::new(conn);
    let tokens = repo
        .list_by_collection(query.network_id, &collection, query.limit, query.offset)?
        .into_iter()
        .map(|nft| {
            let owners = repo.owners(nft.network_id, &nft.collection, &nft.token_id)?;
            Ok((nft, owners))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(format_tokens(&tokens, format))
}

#[derive(Default)]
pub struct ListingQuery {
    pub network_id: Option<u64>,
    pub status: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

pub fn cmd_listings(conn: &Connection, query: ListingQuery, format: &OutputFormat) -> Result<String> {
    let status = query
        .status
        .as_deref()
        .map(ListingStatus::from_str)
        .transpose()?;
    let listings = ListingRepository::new(conn).query_listings(
        query.network_id,
        status,
        query.limit,
        query.offset,
    )?;
    Ok(format_listings(&listings, format))
}

pub fn cmd_offers(
    conn: &Connection,
    network_id: u64,
    listing_id: &str,
    format: &OutputFormat,
) -> Result<String> {
    let listing_id = parse_amount(listing_id)?;
    let offers = ListingRepository::new(conn).offers_for(network_id, &listing_id)?;
    Ok(format_offers(&offers, format))
}

pub fn cmd_airdrops(
    conn: &Connection,
    network_id: u64,
    collection: &str,
    format: &OutputFormat,
) -> Result<String> {
    let collection = parse_address(collection)?;
    let drops = AirdropRepository::new(conn).list_by_collection(network_id, &collection)?;
    Ok(format_airdrops(&drops, format))
}

pub fn cmd_logs(
    conn: &Connection,
    kind: Option<&str>,
    limit: usize,
    format: &OutputFormat,
) -> Result<String> {
    let entries = LogRepository::new(conn).recent(kind, limit)?;
    Ok(format_logs(&entries, format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{Database, Protocol, TrackedContract};

    #[test]
    fn contracts_command_lists_tracked_contracts() {
        let db = Database::in_memory().unwrap();
        let address = Address::from_str("0x00000000000000000000000000000000000000c1").unwrap();
        db.with_conn(|conn| {
            ContractRepository::new(conn).insert(&TrackedContract {
                network_id: 5,
                address,
                protocol: Protocol::Marketplace,
                last_filter_block: 42,
                metadata: None,
                base_uri: None,
            })
        })
        .unwrap();

        let out = db
            .with_conn(|conn| cmd_contracts(conn, &OutputFormat::Csv))
            .unwrap();
        assert!(out.contains("Marketplace"));
        assert!(out.contains(",42,"));
    }

    #[test]
    fn bad_input_is_reported() {
        let db = Database::in_memory().unwrap();
        let err = db
            .with_conn(|conn| {
                cmd_listings(
                    conn,
                    ListingQuery {
                        status: Some("Pending".to_string()),
                        limit: 10,
                        ..Default::default()
                    },
                    &OutputFormat::Table,
                )
            })
            .unwrap_err();
        assert!(err.to_string().contains("Pending"));

        let err = db
            .with_conn(|conn| cmd_airdrops(conn, 5, "not-an-address", &OutputFormat::Table))
            .unwrap_err();
        assert!(err.to_string().contains("Invalid address"));
    }
}
