use super::models::{Nft, NftOwner, canonical, parse_address, parse_u256};
use alloy_primitives::{Address, U256};
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

/// Tokens of tracked collections and the per-owner amount ledger.
///
/// Amounts are stored as decimal strings. A ledger row whose amount reaches
/// zero is deleted, so every stored amount is strictly positive.
pub struct NftRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> NftRepository<'a> {
    const INSERT_NFT: &'static str = "INSERT OR IGNORE INTO nfts
        (network_id, collection, token_id, token_uri, creator, latest_listing_id)
        VALUES (?1, ?2, ?3, ?4, ?5, NULL)";

    const SELECT_NFT: &'static str =
        "SELECT network_id, collection, token_id, token_uri, creator, latest_listing_id FROM nfts";

    const SELECT_OWNER_AMOUNT: &'static str = "SELECT amount FROM nft_owners
        WHERE network_id = ?1 AND collection = ?2 AND token_id = ?3 AND owner = ?4";

    const UPSERT_OWNER_AMOUNT: &'static str = "INSERT INTO nft_owners
        (network_id, collection, token_id, owner, amount) VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (network_id, collection, token_id, owner) DO UPDATE SET amount = excluded.amount";

    const DELETE_OWNER: &'static str = "DELETE FROM nft_owners
        WHERE network_id = ?1 AND collection = ?2 AND token_id = ?3 AND owner = ?4";

    const SELECT_OWNERS: &'static str = "SELECT owner, amount FROM nft_owners
        WHERE network_id = ?1 AND collection = ?2 AND token_id = ?3 ORDER BY owner";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Creates the token row if it does not exist yet. Returns whether it was created.
    pub fn insert_if_absent(&self, nft: &Nft) -> Result<bool> {
        let inserted = self.conn.execute(
            Self::INSERT_NFT,
            params![
                nft.network_id,
                canonical(&nft.collection),
                nft.token_id.to_string(),
                nft.token_uri,
                canonical(&nft.creator),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn find(&self, network_id: u64, collection: &Address, token_id: &U256) -> Result<Option<Nft>> {
        let query = format!(
            "{} WHERE network_id = ?1 AND collection = ?2 AND token_id = ?3",
            Self::SELECT_NFT
        );
        let nft = self
            .conn
            .query_row(
                &query,
                params![network_id, canonical(collection), token_id.to_string()],
                Self::row_to_nft,
            )
            .optional()?;
        Ok(nft)
    }

    pub fn list_by_collection(
        &self,
        network_id: u64,
        collection: &Address,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Nft>> {
        let query = format!(
            "{} WHERE network_id = ?1 AND collection = ?2
             ORDER BY length(token_id), token_id LIMIT ?3 OFFSET ?4",
            Self::SELECT_NFT
        );
        let mut stmt = self.conn.prepare(&query)?;
        let nfts = stmt
            .query_map(
                params![network_id, canonical(collection), limit, offset],
                Self::row_to_nft,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nfts)
    }

    /// Rewrites the URI of every token of a collection as `base_uri || token_id`.
    pub fn apply_base_uri(&self, network_id: u64, collection: &Address, base_uri: &str) -> Result<usize> {
        let updated = self.conn.execute(
            "UPDATE nfts SET token_uri = ?1 || token_id WHERE network_id = ?2 AND collection = ?3",
            params![base_uri, network_id, canonical(collection)],
        )?;
        Ok(updated)
    }

    pub fn set_latest_listing(
        &self,
        network_id: u64,
        collection: &Address,
        token_id: &U256,
        listing_id: &U256,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE nfts SET latest_listing_id = ?1
             WHERE network_id = ?2 AND collection = ?3 AND token_id = ?4",
            params![
                listing_id.to_string(),
                network_id,
                canonical(collection),
                token_id.to_string()
            ],
        )?;
        Ok(())
    }

    pub fn owner_amount(
        &self,
        network_id: u64,
        collection: &Address,
        token_id: &U256,
        owner: &Address,
    ) -> Result<Option<U256>> {
        let amount = self
            .conn
            .query_row(
                Self::SELECT_OWNER_AMOUNT,
                params![
                    network_id,
                    canonical(collection),
                    token_id.to_string(),
                    canonical(owner)
                ],
                |row| parse_u256(0, row.get(0)?),
            )
            .optional()?;
        Ok(amount)
    }

    /// Stores `amount` for `owner`, deleting the entry when it is zero.
    pub fn set_owner_amount(
        &self,
        network_id: u64,
        collection: &Address,
        token_id: &U256,
        owner: &Address,
        amount: &U256,
    ) -> Result<()> {
        let collection = canonical(collection);
        let token_id = token_id.to_string();
        let owner = canonical(owner);

        if amount.is_zero() {
            self.conn.execute(
                Self::DELETE_OWNER,
                params![network_id, collection, token_id, owner],
            )?;
        } else {
            self.conn.execute(
                Self::UPSERT_OWNER_AMOUNT,
                params![network_id, collection, token_id, owner, amount.to_string()],
            )?;
        }
        Ok(())
    }

    pub fn owners(&self, network_id: u64, collection: &Address, token_id: &U256) -> Result<Vec<NftOwner>> {
        let mut stmt = self.conn.prepare(Self::SELECT_OWNERS)?;
        let owners = stmt
            .query_map(
                params![network_id, canonical(collection), token_id.to_string()],
                |row| {
                    Ok(NftOwner {
                        owner: parse_address(0, row.get(0)?)?,
                        amount: parse_u256(1, row.get(1)?)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(owners)
    }

    /// Sum of all owner amounts of a token.
    pub fn total_supply(&self, network_id: u64, collection: &Address, token_id: &U256) -> Result<U256> {
        let owners = self.owners(network_id, collection, token_id)?;
        owners.iter().try_fold(U256::ZERO, |acc, o| {
            acc.checked_add(o.amount)
                .ok_or_else(|| anyhow::anyhow!("Overflow in supply calculation"))
        })
    }

    fn row_to_nft(row: &Row) -> rusqlite::Result<Nft> {
        let latest: Option<String> = row.get(5)?;
        Ok(Nft {
            network_id: row.get(0)?,
            collection: parse_address(1, row.get(1)?)?,
            token_id: parse_u256(2, row.get(2)?)?,
            token_uri: row.get(3)?,
            creator: parse_address(4, row.get(4)?)?,
            latest_listing_id: latest.map(|l| parse_u256(5, l)).transpose()?,
        })
    }
}
