//! Event-to-projection mutations.
//!
//! Each handler receives an already decoded event and the connection of the
//! SQLite transaction it runs in. Referential problems (unknown collection,
//! missing listing, a balance that would go negative) are returned as
//! [`IngestError`]s so the poller can tell them apart from I/O failures.

mod collection;
mod marketplace;

use crate::error::IngestError;
use crate::events::ContractEvent;
use crate::repository::{ContractRepository, NftRepository, Protocol, TrackedContract};
use alloy_primitives::{Address, U256};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

/// Which contract an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerContext {
    pub network_id: u64,
    pub contract: Address,
    pub protocol: Protocol,
}

pub fn apply(conn: &Connection, ctx: &HandlerContext, event: &ContractEvent) -> Result<()> {
    match event {
        ContractEvent::DropCreated {
            drop_id,
            supply,
            mint_limit_per_wallet,
            start_time,
            end_time,
            price,
            has_whitelist_phase,
            whitelist_end_time,
            whitelist_price,
        } => collection::drop_created(
            conn,
            ctx,
            collection::DropTerms {
                drop_id: *drop_id,
                supply: *supply,
                mint_limit_per_wallet: *mint_limit_per_wallet,
                start_time: *start_time,
                end_time: *end_time,
                price: *price,
                has_whitelist_phase: *has_whitelist_phase,
                whitelist_end_time: *whitelist_end_time,
                whitelist_price: *whitelist_price,
            },
        ),
        ContractEvent::TokenMinted {
            token_id,
            token_uri,
            amount,
            holder,
        } => collection::token_minted(conn, ctx, *token_id, token_uri.as_deref(), *amount, holder),
        ContractEvent::BaseUriSet { base_uri } => collection::base_uri_set(conn, ctx, base_uri),
        ContractEvent::TokenBurned {
            token_id,
            amount,
            burner,
        } => collection::token_burned(conn, ctx, *token_id, *amount, burner),
        ContractEvent::CrosschainAddressSet { network_id, peer } => {
            collection::crosschain_address_set(conn, ctx, *network_id, peer)
        }
        ContractEvent::Listed {
            listing_id,
            seller,
            collection,
            token_id,
            amount,
            price,
            token_type: _,
        } => marketplace::listed(
            conn,
            ctx,
            *listing_id,
            seller,
            collection,
            *token_id,
            *amount,
            *price,
        ),
        ContractEvent::Cancelled { listing_id } => marketplace::cancelled(conn, ctx, *listing_id),
        ContractEvent::Bought {
            listing_id,
            buyer,
            price: _,
            amount,
        } => marketplace::bought(conn, ctx, *listing_id, buyer, *amount),
        ContractEvent::OfferMade {
            listing_id,
            offerer,
            price,
            amount,
            offer_index,
        } => marketplace::offer_made(conn, ctx, *listing_id, offerer, *price, *amount, *offer_index),
        ContractEvent::OfferAccepted {
            listing_id,
            offerer,
            price: _,
            amount,
            offer_index,
        } => marketplace::offer_accepted(conn, ctx, *listing_id, offerer, *amount, *offer_index),
        ContractEvent::OfferCancelled {
            listing_id,
            offerer: _,
            offer_index,
        } => marketplace::offer_cancelled(conn, ctx, *listing_id, *offer_index),
    }
}

/// The tracked collection at `address` on `network_id`.
fn require_collection(
    conn: &Connection,
    network_id: u64,
    address: &Address,
) -> Result<TrackedContract> {
    ContractRepository::new(conn)
        .find(network_id, address)?
        .filter(|contract| contract.protocol.is_collection())
        .ok_or_else(|| {
            IngestError::UnknownCollection {
                network_id,
                address: *address,
            }
            .into()
        })
}

/// Adds `amount` to `owner`'s entry, creating it if needed.
fn credit(
    conn: &Connection,
    network_id: u64,
    collection: &Address,
    token_id: &U256,
    owner: &Address,
    amount: U256,
) -> Result<()> {
    let repo = NftRepository::new(conn);
    let held = repo
        .owner_amount(network_id, collection, token_id, owner)?
        .unwrap_or_default();
    repo.set_owner_amount(
        network_id,
        collection,
        token_id,
        owner,
        &held.saturating_add(amount),
    )
}

/// Removes `amount` from `owner`'s entry. Fails when the owner has no entry or
/// holds less than `amount`; the entry is dropped once it reaches zero.
fn debit(
    conn: &Connection,
    network_id: u64,
    collection: &Address,
    token_id: &U256,
    owner: &Address,
    amount: U256,
) -> Result<()> {
    let repo = NftRepository::new(conn);
    let held = repo
        .owner_amount(network_id, collection, token_id, owner)?
        .unwrap_or_default();
    if held.is_zero() || held < amount {
        return Err(IngestError::InsufficientBalance {
            owner: *owner,
            token_id: *token_id,
            held,
            requested: amount,
        }
        .into());
    }
    repo.set_owner_amount(network_id, collection, token_id, owner, &(held - amount))
}

const MILLIS_THRESHOLD: u64 = 10_000_000_000;

/// Contract timestamps come in seconds or milliseconds; anything below 1e10
/// is taken as seconds.
pub fn block_time_to_datetime(value: U256) -> Option<DateTime<Utc>> {
    let raw = u64::try_from(value).ok()?;
    let millis = if raw < MILLIS_THRESHOLD {
        raw.checked_mul(1000)?
    } else {
        raw
    };
    DateTime::from_timestamp_millis(i64::try_from(millis).ok()?)
}
