use alloy_primitives::{Address, U256};
use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Contract standards the indexer knows how to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "ERC-721")]
    Erc721,
    #[serde(rename = "ERC-1155")]
    Erc1155,
    Marketplace,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Erc721 => "ERC-721",
            Protocol::Erc1155 => "ERC-1155",
            Protocol::Marketplace => "Marketplace",
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Protocol::Erc721 | Protocol::Erc1155)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "erc721" => Ok(Protocol::Erc721),
            "erc1155" => Ok(Protocol::Erc1155),
            "marketplace" => Ok(Protocol::Marketplace),
            other => bail!("Unknown protocol: {other}"),
        }
    }
}

/// Immutable collection facts read from the chain on first sight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMetadata {
    pub owner: Address,
    pub name: String,
    pub symbol: String,
    pub logo_uri: String,
    pub is_base: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedContract {
    pub network_id: u64,
    pub address: Address,
    pub protocol: Protocol,
    /// Inclusive watermark of the last scanned block.
    pub last_filter_block: u64,
    /// `None` for marketplaces.
    pub metadata: Option<CollectionMetadata>,
    pub base_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrosschainAddress {
    pub peer_network_id: u64,
    pub peer_address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nft {
    pub network_id: u64,
    pub collection: Address,
    pub token_id: U256,
    pub token_uri: String,
    pub creator: Address,
    pub latest_listing_id: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftOwner {
    pub owner: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Airdrop {
    pub network_id: u64,
    pub collection: Address,
    pub drop_id: U256,
    pub supply: U256,
    pub minted: U256,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price: U256,
    pub has_whitelist_phase: bool,
    pub whitelist_end_time: DateTime<Utc>,
    pub whitelist_price: U256,
    pub mint_limit_per_wallet: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingStatus {
    Listed,
    Sold,
    Canceled,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Listed => "Listed",
            ListingStatus::Sold => "Sold",
            ListingStatus::Canceled => "Canceled",
        }
    }
}

impl FromStr for ListingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Listed" => Ok(ListingStatus::Listed),
            "Sold" => Ok(ListingStatus::Sold),
            "Canceled" => Ok(ListingStatus::Canceled),
            other => bail!("Unknown listing status: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub network_id: u64,
    pub listing_id: U256,
    pub marketplace: Address,
    pub seller: Address,
    pub collection: Address,
    pub token_id: U256,
    pub price: U256,
    pub list_amount: U256,
    pub status: ListingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub network_id: u64,
    pub listing_id: U256,
    pub offer_index: U256,
    pub offerer: Address,
    pub price: U256,
    pub amount: U256,
    pub accepted: bool,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: i64,
    pub kind: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Lower-case `0x` form used as the key for every stored address.
pub fn canonical(address: &Address) -> String {
    address.to_string().to_lowercase()
}

pub(crate) fn parse_address(idx: usize, value: String) -> rusqlite::Result<Address> {
    Address::from_str(&value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_u256(idx: usize, value: String) -> rusqlite::Result<U256> {
    U256::from_str(&value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_datetime(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
