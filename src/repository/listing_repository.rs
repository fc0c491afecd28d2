use super::models::{Listing, ListingStatus, Offer, canonical, parse_address, parse_u256};
use alloy_primitives::U256;
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, ToSql, params, params_from_iter};

pub struct ListingRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> ListingRepository<'a> {
    const INSERT_LISTING: &'static str = "INSERT OR IGNORE INTO listings (
            network_id, listing_id, marketplace, seller, collection,
            token_id, price, list_amount, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

    const SELECT_LISTING: &'static str = "SELECT network_id, listing_id, marketplace, seller,
            collection, token_id, price, list_amount, status FROM listings";

    const UPDATE_LISTING_STATE: &'static str = "UPDATE listings SET list_amount = ?1, status = ?2
        WHERE network_id = ?3 AND listing_id = ?4";

    const INSERT_OFFER: &'static str = "INSERT OR IGNORE INTO offers
        (network_id, listing_id, offer_index, offerer, price, amount, accepted)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)";

    const SELECT_OFFER: &'static str = "SELECT network_id, listing_id, offer_index, offerer,
            price, amount, accepted FROM offers";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, listing: &Listing) -> Result<bool> {
        let inserted = self.conn.execute(
            Self::INSERT_LISTING,
            params![
                listing.network_id,
                listing.listing_id.to_string(),
                canonical(&listing.marketplace),
                canonical(&listing.seller),
                canonical(&listing.collection),
                listing.token_id.to_string(),
                listing.price.to_string(),
                listing.list_amount.to_string(),
                listing.status.as_str(),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn find(&self, network_id: u64, listing_id: &U256) -> Result<Option<Listing>> {
        let query = format!("{} WHERE network_id = ?1 AND listing_id = ?2", Self::SELECT_LISTING);
        let listing = self
            .conn
            .query_row(
                &query,
                params![network_id, listing_id.to_string()],
                Self::row_to_listing,
            )
            .optional()?;
        Ok(listing)
    }

    pub fn update_state(
        &self,
        network_id: u64,
        listing_id: &U256,
        list_amount: &U256,
        status: ListingStatus,
    ) -> Result<()> {
        self.conn.execute(
            Self::UPDATE_LISTING_STATE,
            params![
                list_amount.to_string(),
                status.as_str(),
                network_id,
                listing_id.to_string()
            ],
        )?;
        Ok(())
    }

    pub fn query_listings(
        &self,
        network_id: Option<u64>,
        status: Option<ListingStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Listing>> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(network_id) = network_id {
            conditions.push("network_id = ?");
            params.push(Box::new(network_id));
        }

        if let Some(status) = status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        let mut query = Self::SELECT_LISTING.to_string();
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(&format!(
            " ORDER BY network_id, length(listing_id), listing_id LIMIT {limit} OFFSET {offset}"
        ));

        let mut stmt = self.conn.prepare(&query)?;
        let listings = stmt
            .query_map(params_from_iter(params), Self::row_to_listing)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(listings)
    }

    pub fn insert_offer(&self, offer: &Offer) -> Result<bool> {
        let inserted = self.conn.execute(
            Self::INSERT_OFFER,
            params![
                offer.network_id,
                offer.listing_id.to_string(),
                offer.offer_index.to_string(),
                canonical(&offer.offerer),
                offer.price.to_string(),
                offer.amount.to_string(),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn find_offer(
        &self,
        network_id: u64,
        listing_id: &U256,
        offer_index: &U256,
    ) -> Result<Option<Offer>> {
        let query = format!(
            "{} WHERE network_id = ?1 AND listing_id = ?2 AND offer_index = ?3",
            Self::SELECT_OFFER
        );
        let offer = self
            .conn
            .query_row(
                &query,
                params![network_id, listing_id.to_string(), offer_index.to_string()],
                Self::row_to_offer,
            )
            .optional()?;
        Ok(offer)
    }

    pub fn offers_for(&self, network_id: u64, listing_id: &U256) -> Result<Vec<Offer>> {
        let query = format!(
            "{} WHERE network_id = ?1 AND listing_id = ?2 ORDER BY length(offer_index), offer_index",
            Self::SELECT_OFFER
        );
        let mut stmt = self.conn.prepare(&query)?;
        let offers = stmt
            .query_map(params![network_id, listing_id.to_string()], Self::row_to_offer)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(offers)
    }

    pub fn mark_offer_accepted(&self, network_id: u64, listing_id: &U256, offer_index: &U256) -> Result<()> {
        self.conn.execute(
            "UPDATE offers SET accepted = 1
             WHERE network_id = ?1 AND listing_id = ?2 AND offer_index = ?3",
            params![network_id, listing_id.to_string(), offer_index.to_string()],
        )?;
        Ok(())
    }

    /// Returns whether an offer was removed.
    pub fn delete_offer(&self, network_id: u64, listing_id: &U256, offer_index: &U256) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM offers WHERE network_id = ?1 AND listing_id = ?2 AND offer_index = ?3",
            params![network_id, listing_id.to_string(), offer_index.to_string()],
        )?;
        Ok(deleted > 0)
    }

    fn row_to_listing(row: &Row) -> rusqlite::Result<Listing> {
        let status: String = row.get(8)?;
        let status = status.parse::<ListingStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(Listing {
            network_id: row.get(0)?,
            listing_id: parse_u256(1, row.get(1)?)?,
            marketplace: parse_address(2, row.get(2)?)?,
            seller: parse_address(3, row.get(3)?)?,
            collection: parse_address(4, row.get(4)?)?,
            token_id: parse_u256(5, row.get(5)?)?,
            price: parse_u256(6, row.get(6)?)?,
            list_amount: parse_u256(7, row.get(7)?)?,
            status,
        })
    }

    fn row_to_offer(row: &Row) -> rusqlite::Result<Offer> {
        Ok(Offer {
            network_id: row.get(0)?,
            listing_id: parse_u256(1, row.get(1)?)?,
            offer_index: parse_u256(2, row.get(2)?)?,
            offerer: parse_address(3, row.get(3)?)?,
            price: parse_u256(4, row.get(4)?)?,
            amount: parse_u256(5, row.get(5)?)?,
            accepted: row.get(6)?,
        })
    }
}
