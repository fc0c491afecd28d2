use super::{HandlerContext, credit, debit, require_collection};
use crate::error::IngestError;
use crate::repository::{
    Listing, ListingRepository, ListingStatus, NftRepository, Offer, UserRepository,
};
use alloy_primitives::{Address, U256};
use anyhow::Result;
use rusqlite::Connection;
use tracing::debug;

fn require_listing(conn: &Connection, network_id: u64, listing_id: U256) -> Result<Listing> {
    ListingRepository::new(conn)
        .find(network_id, &listing_id)?
        .ok_or_else(|| {
            IngestError::UnknownListing {
                network_id,
                listing_id,
            }
            .into()
        })
}

/// Moves `amount` units of the listed token from the seller to `buyer` and
/// draws the listing down by the same amount. A listing drawn to zero is sold.
fn settle_sale(conn: &Connection, listing: &Listing, buyer: &Address, amount: U256) -> Result<()> {
    let remaining = listing
        .list_amount
        .checked_sub(amount)
        .ok_or(IngestError::ListingAmountExceeded {
            listing_id: listing.listing_id,
            remaining: listing.list_amount,
            requested: amount,
        })?;

    if NftRepository::new(conn)
        .find(listing.network_id, &listing.collection, &listing.token_id)?
        .is_none()
    {
        return Err(IngestError::UnknownToken {
            collection: listing.collection,
            token_id: listing.token_id,
        }
        .into());
    }

    let status = if remaining.is_zero() {
        ListingStatus::Sold
    } else {
        listing.status
    };
    ListingRepository::new(conn).update_state(
        listing.network_id,
        &listing.listing_id,
        &remaining,
        status,
    )?;

    UserRepository::new(conn).find_or_create(buyer)?;
    debit(
        conn,
        listing.network_id,
        &listing.collection,
        &listing.token_id,
        &listing.seller,
        amount,
    )?;
    credit(
        conn,
        listing.network_id,
        &listing.collection,
        &listing.token_id,
        buyer,
        amount,
    )
}

#[allow(clippy::too_many_arguments)]
pub(super) fn listed(
    conn: &Connection,
    ctx: &HandlerContext,
    listing_id: U256,
    seller: &Address,
    collection: &Address,
    token_id: U256,
    amount: U256,
    price: U256,
) -> Result<()> {
    UserRepository::new(conn).find_or_create(seller)?;
    require_collection(conn, ctx.network_id, collection)?;

    let nfts = NftRepository::new(conn);
    if nfts.find(ctx.network_id, collection, &token_id)?.is_none() {
        return Err(IngestError::UnknownToken {
            collection: *collection,
            token_id,
        }
        .into());
    }

    let inserted = ListingRepository::new(conn).insert(&Listing {
        network_id: ctx.network_id,
        listing_id,
        marketplace: ctx.contract,
        seller: *seller,
        collection: *collection,
        token_id,
        price,
        list_amount: amount,
        status: ListingStatus::Listed,
    })?;
    if !inserted {
        debug!(%listing_id, "Listing already recorded");
    }

    nfts.set_latest_listing(ctx.network_id, collection, &token_id, &listing_id)
}

pub(super) fn cancelled(conn: &Connection, ctx: &HandlerContext, listing_id: U256) -> Result<()> {
    let listing = require_listing(conn, ctx.network_id, listing_id)?;
    ListingRepository::new(conn).update_state(
        ctx.network_id,
        &listing_id,
        &listing.list_amount,
        ListingStatus::Canceled,
    )
}

pub(super) fn bought(
    conn: &Connection,
    ctx: &HandlerContext,
    listing_id: U256,
    buyer: &Address,
    amount: U256,
) -> Result<()> {
    let listing = require_listing(conn, ctx.network_id, listing_id)?;
    settle_sale(conn, &listing, buyer, amount)
}

pub(super) fn offer_made(
    conn: &Connection,
    ctx: &HandlerContext,
    listing_id: U256,
    offerer: &Address,
    price: U256,
    amount: U256,
    offer_index: U256,
) -> Result<()> {
    require_listing(conn, ctx.network_id, listing_id)?;
    UserRepository::new(conn).find_or_create(offerer)?;

    let inserted = ListingRepository::new(conn).insert_offer(&Offer {
        network_id: ctx.network_id,
        listing_id,
        offer_index,
        offerer: *offerer,
        price,
        amount,
        accepted: false,
    })?;
    if !inserted {
        debug!(%listing_id, %offer_index, "Offer already recorded");
    }
    Ok(())
}

pub(super) fn offer_accepted(
    conn: &Connection,
    ctx: &HandlerContext,
    listing_id: U256,
    offerer: &Address,
    amount: U256,
    offer_index: U256,
) -> Result<()> {
    let listing = require_listing(conn, ctx.network_id, listing_id)?;
    let repo = ListingRepository::new(conn);
    if repo
        .find_offer(ctx.network_id, &listing_id, &offer_index)?
        .is_none()
    {
        return Err(IngestError::UnknownOffer {
            listing_id,
            offer_index,
        }
        .into());
    }

    if amount > listing.list_amount {
        return Err(IngestError::ListingAmountExceeded {
            listing_id,
            remaining: listing.list_amount,
            requested: amount,
        }
        .into());
    }

    settle_sale(conn, &listing, offerer, amount)?;
    repo.mark_offer_accepted(ctx.network_id, &listing_id, &offer_index)
}

pub(super) fn offer_cancelled(
    conn: &Connection,
    ctx: &HandlerContext,
    listing_id: U256,
    offer_index: U256,
) -> Result<()> {
    require_listing(conn, ctx.network_id, listing_id)?;
    let removed = ListingRepository::new(conn).delete_offer(ctx.network_id, &listing_id, &offer_index)?;
    if !removed {
        return Err(IngestError::UnknownOffer {
            listing_id,
            offer_index,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::apply;
    use super::*;
    use crate::events::ContractEvent;
    use crate::repository::{ContractRepository, Database, Nft, Protocol, TrackedContract};
    use alloy_primitives::address;

    const NETWORK: u64 = 5;
    const COLLECTION: Address = address!("0x00000000000000000000000000000000000000c1");
    const MARKET: Address = address!("0x00000000000000000000000000000000000000d1");
    const SELLER: Address = address!("0x00000000000000000000000000000000000000a1");
    const OFFERER: Address = address!("0x00000000000000000000000000000000000000b1");

    fn ctx() -> HandlerContext {
        HandlerContext {
            network_id: NETWORK,
            contract: MARKET,
            protocol: Protocol::Marketplace,
        }
    }

    /// Seller holds 4 units of token 7 listed as listing 1.
    fn setup() -> Database {
        let db = Database::in_memory().unwrap();
        db.transaction(|conn| {
            ContractRepository::new(conn).insert(&TrackedContract {
                network_id: NETWORK,
                address: COLLECTION,
                protocol: Protocol::Erc1155,
                last_filter_block: 0,
                metadata: None,
                base_uri: None,
            })?;
            let nfts = NftRepository::new(conn);
            nfts.insert_if_absent(&Nft {
                network_id: NETWORK,
                collection: COLLECTION,
                token_id: U256::from(7),
                token_uri: String::new(),
                creator: SELLER,
                latest_listing_id: None,
            })?;
            nfts.set_owner_amount(NETWORK, &COLLECTION, &U256::from(7), &SELLER, &U256::from(4))?;
            apply(
                conn,
                &ctx(),
                &ContractEvent::Listed {
                    listing_id: U256::from(1),
                    seller: SELLER,
                    collection: COLLECTION,
                    token_id: U256::from(7),
                    amount: U256::from(4),
                    price: U256::from(50),
                    token_type: U256::from(1),
                },
            )
        })
        .unwrap();
        db
    }

    fn run(db: &Database, event: ContractEvent) -> Result<()> {
        db.transaction(|conn| apply(conn, &ctx(), &event))
    }

    fn offer(index: u64, amount: u64) -> ContractEvent {
        ContractEvent::OfferMade {
            listing_id: U256::from(1),
            offerer: OFFERER,
            price: U256::from(40),
            amount: U256::from(amount),
            offer_index: U256::from(index),
        }
    }

    fn accept(index: u64, amount: u64) -> ContractEvent {
        ContractEvent::OfferAccepted {
            listing_id: U256::from(1),
            offerer: OFFERER,
            price: U256::from(40),
            amount: U256::from(amount),
            offer_index: U256::from(index),
        }
    }

    #[test]
    fn listing_sets_back_reference() {
        let db = setup();
        let nft = db
            .with_conn(|conn| NftRepository::new(conn).find(NETWORK, &COLLECTION, &U256::from(7)))
            .unwrap()
            .unwrap();
        assert_eq!(nft.latest_listing_id, Some(U256::from(1)));
    }

    #[test]
    fn accepted_offer_moves_tokens() {
        let db = setup();
        run(&db, offer(0, 3)).unwrap();
        run(&db, accept(0, 3)).unwrap();

        db.with_conn(|conn| {
            let listing = ListingRepository::new(conn).find(NETWORK, &U256::from(1))?.unwrap();
            assert_eq!(listing.list_amount, U256::from(1));
            assert_eq!(listing.status, ListingStatus::Listed);

            let offers = ListingRepository::new(conn).offers_for(NETWORK, &U256::from(1))?;
            assert!(offers[0].accepted);

            let nfts = NftRepository::new(conn);
            let token = U256::from(7);
            assert_eq!(
                nfts.owner_amount(NETWORK, &COLLECTION, &token, &SELLER)?,
                Some(U256::from(1))
            );
            assert_eq!(
                nfts.owner_amount(NETWORK, &COLLECTION, &token, &OFFERER)?,
                Some(U256::from(3))
            );
            assert_eq!(nfts.total_supply(NETWORK, &COLLECTION, &token)?, U256::from(4));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn offer_larger_than_listing_is_refused() {
        let db = setup();
        run(&db, offer(0, 5)).unwrap();
        let err = run(&db, accept(0, 5)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::ListingAmountExceeded { .. })
        ));
    }

    #[test]
    fn accepting_or_cancelling_a_missing_offer_fails() {
        let db = setup();
        let err = run(&db, accept(9, 1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::UnknownOffer { .. })
        ));

        run(&db, offer(2, 1)).unwrap();
        let cancel = ContractEvent::OfferCancelled {
            listing_id: U256::from(1),
            offerer: OFFERER,
            offer_index: U256::from(2),
        };
        run(&db, cancel.clone()).unwrap();
        let err = run(&db, cancel).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::UnknownOffer { .. })
        ));
    }

    #[test]
    fn cancel_keeps_remaining_amount() {
        let db = setup();
        run(
            &db,
            ContractEvent::Cancelled {
                listing_id: U256::from(1),
            },
        )
        .unwrap();
        let listing = db
            .with_conn(|conn| ListingRepository::new(conn).find(NETWORK, &U256::from(1)))
            .unwrap()
            .unwrap();
        assert_eq!(listing.status, ListingStatus::Canceled);
        assert_eq!(listing.list_amount, U256::from(4));

        let err = run(
            &db,
            ContractEvent::Cancelled {
                listing_id: U256::from(2),
            },
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::UnknownListing { .. })
        ));
    }
}
