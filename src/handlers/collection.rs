use super::{HandlerContext, block_time_to_datetime, credit, debit, require_collection};
use crate::error::IngestError;
use crate::repository::{
    Airdrop, AirdropRepository, ContractRepository, CrosschainAddress, Nft, NftRepository,
    Protocol, UserRepository,
};
use alloy_primitives::{Address, U256};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, warn};

/// Largest ERC-721 batch a single `TokenMinted` may create.
const MAX_BATCH_MINT: u64 = 10_000;

pub(super) struct DropTerms {
    pub drop_id: U256,
    pub supply: U256,
    pub mint_limit_per_wallet: U256,
    pub start_time: U256,
    pub end_time: U256,
    pub price: U256,
    pub has_whitelist_phase: bool,
    pub whitelist_end_time: U256,
    pub whitelist_price: U256,
}

fn drop_time(value: U256) -> Result<DateTime<Utc>, IngestError> {
    block_time_to_datetime(value).ok_or_else(|| IngestError::Decode {
        event: "DropCreated",
        reason: format!("timestamp {value} is out of range"),
    })
}

pub(super) fn drop_created(conn: &Connection, ctx: &HandlerContext, terms: DropTerms) -> Result<()> {
    require_collection(conn, ctx.network_id, &ctx.contract)?;

    let inserted = AirdropRepository::new(conn).insert(&Airdrop {
        network_id: ctx.network_id,
        collection: ctx.contract,
        drop_id: terms.drop_id,
        supply: terms.supply,
        minted: U256::ZERO,
        start_time: drop_time(terms.start_time)?,
        end_time: drop_time(terms.end_time)?,
        price: terms.price,
        has_whitelist_phase: terms.has_whitelist_phase,
        whitelist_end_time: drop_time(terms.whitelist_end_time)?,
        whitelist_price: terms.whitelist_price,
        mint_limit_per_wallet: terms.mint_limit_per_wallet,
    })?;
    if !inserted {
        debug!(drop_id = %terms.drop_id, "Drop already recorded");
    }
    Ok(())
}

/// ERC-721 mints `amount` consecutive ids starting at `token_id`, one unit
/// each. ERC-1155 credits `amount` units of a single id.
pub(super) fn token_minted(
    conn: &Connection,
    ctx: &HandlerContext,
    token_id: U256,
    token_uri: Option<&str>,
    amount: U256,
    holder: &Address,
) -> Result<()> {
    let collection = require_collection(conn, ctx.network_id, &ctx.contract)?;
    UserRepository::new(conn).find_or_create(holder)?;
    let nfts = NftRepository::new(conn);

    match collection.protocol {
        Protocol::Erc721 => {
            let count = u64::try_from(amount)
                .ok()
                .filter(|count| *count <= MAX_BATCH_MINT)
                .ok_or_else(|| IngestError::Decode {
                    event: "TokenMinted",
                    reason: format!("mint amount {amount} is out of range"),
                })?;
            for offset in 0..count {
                let id = token_id.saturating_add(U256::from(offset));
                let uri = collection
                    .base_uri
                    .as_deref()
                    .map(|base| format!("{base}{id}"))
                    .unwrap_or_default();
                nfts.insert_if_absent(&Nft {
                    network_id: ctx.network_id,
                    collection: ctx.contract,
                    token_id: id,
                    token_uri: uri,
                    creator: *holder,
                    latest_listing_id: None,
                })?;
                credit(conn, ctx.network_id, &ctx.contract, &id, holder, U256::from(1))?;
            }
        }
        _ => {
            nfts.insert_if_absent(&Nft {
                network_id: ctx.network_id,
                collection: ctx.contract,
                token_id,
                token_uri: token_uri.unwrap_or_default().to_string(),
                creator: *holder,
                latest_listing_id: None,
            })?;
            credit(conn, ctx.network_id, &ctx.contract, &token_id, holder, amount)?;
        }
    }
    Ok(())
}

pub(super) fn token_burned(
    conn: &Connection,
    ctx: &HandlerContext,
    token_id: U256,
    amount: U256,
    burner: &Address,
) -> Result<()> {
    require_collection(conn, ctx.network_id, &ctx.contract)?;

    if NftRepository::new(conn)
        .find(ctx.network_id, &ctx.contract, &token_id)?
        .is_none()
    {
        return Err(IngestError::UnknownToken {
            collection: ctx.contract,
            token_id,
        }
        .into());
    }

    debit(conn, ctx.network_id, &ctx.contract, &token_id, burner, amount)
}

pub(super) fn base_uri_set(conn: &Connection, ctx: &HandlerContext, base_uri: &str) -> Result<()> {
    require_collection(conn, ctx.network_id, &ctx.contract)?;

    ContractRepository::new(conn).set_base_uri(ctx.network_id, &ctx.contract, base_uri)?;
    let updated = NftRepository::new(conn).apply_base_uri(ctx.network_id, &ctx.contract, base_uri)?;
    debug!(updated, "Back-filled token URIs");
    Ok(())
}

/// Appends without checking for an existing identical pair.
pub(super) fn crosschain_address_set(
    conn: &Connection,
    ctx: &HandlerContext,
    peer_network_id: U256,
    peer: &Address,
) -> Result<()> {
    require_collection(conn, ctx.network_id, &ctx.contract)?;

    let peer_network_id = u64::try_from(peer_network_id).map_err(|_| IngestError::Decode {
        event: "CrosschainAddressSet",
        reason: format!("network id {peer_network_id} is out of range"),
    })?;

    let repo = ContractRepository::new(conn);
    let known = repo.crosschain_addresses(ctx.network_id, &ctx.contract)?;
    if known
        .iter()
        .any(|entry| entry.peer_network_id == peer_network_id && entry.peer_address == *peer)
    {
        warn!(peer_network_id, peer = ?peer, "Cross-chain address already listed, appending again");
    }

    repo.push_crosschain_address(
        ctx.network_id,
        &ctx.contract,
        &CrosschainAddress {
            peer_network_id,
            peer_address: *peer,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::super::apply;
    use super::*;
    use crate::events::ContractEvent;
    use crate::repository::{Database, TrackedContract};
    use alloy_primitives::address;

    const NETWORK: u64 = 5;
    const COLLECTION: Address = address!("0x00000000000000000000000000000000000000c7");
    const HOLDER: Address = address!("0x00000000000000000000000000000000000000a1");

    fn ctx() -> HandlerContext {
        HandlerContext {
            network_id: NETWORK,
            contract: COLLECTION,
            protocol: Protocol::Erc721,
        }
    }

    fn setup() -> Database {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            ContractRepository::new(conn).insert(&TrackedContract {
                network_id: NETWORK,
                address: COLLECTION,
                protocol: Protocol::Erc721,
                last_filter_block: 0,
                metadata: None,
                base_uri: None,
            })
        })
        .unwrap();
        db
    }

    fn run(db: &Database, event: ContractEvent) -> Result<()> {
        db.transaction(|conn| apply(conn, &ctx(), &event))
    }

    #[test]
    fn oversized_erc721_batch_is_refused() {
        let db = setup();
        let err = run(
            &db,
            ContractEvent::TokenMinted {
                token_id: U256::from(1),
                token_uri: None,
                amount: U256::from(MAX_BATCH_MINT + 1),
                holder: HOLDER,
            },
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::Decode { .. })
        ));

        let minted = db
            .with_conn(|conn| NftRepository::new(conn).list_by_collection(NETWORK, &COLLECTION, 10, 0))
            .unwrap();
        assert!(minted.is_empty());
    }

    #[test]
    fn erc721_mint_creates_consecutive_tokens() {
        let db = setup();
        run(
            &db,
            ContractEvent::TokenMinted {
                token_id: U256::from(10),
                token_uri: None,
                amount: U256::from(3),
                holder: HOLDER,
            },
        )
        .unwrap();

        db.with_conn(|conn| {
            let repo = NftRepository::new(conn);
            let tokens = repo.list_by_collection(NETWORK, &COLLECTION, 10, 0)?;
            let ids: Vec<U256> = tokens.iter().map(|t| t.token_id).collect();
            assert_eq!(ids, vec![U256::from(10), U256::from(11), U256::from(12)]);
            for id in ids {
                assert_eq!(
                    repo.owner_amount(NETWORK, &COLLECTION, &id, &HOLDER)?,
                    Some(U256::from(1))
                );
            }
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn base_uri_backfills_existing_and_future_tokens() {
        let db = setup();
        let mint = |id: u64| ContractEvent::TokenMinted {
            token_id: U256::from(id),
            token_uri: None,
            amount: U256::from(1),
            holder: HOLDER,
        };
        run(&db, mint(1)).unwrap();
        run(
            &db,
            ContractEvent::BaseUriSet {
                base_uri: "ipfs://base/".to_string(),
            },
        )
        .unwrap();
        run(&db, mint(2)).unwrap();

        db.with_conn(|conn| {
            let repo = NftRepository::new(conn);
            let first = repo.find(NETWORK, &COLLECTION, &U256::from(1))?.unwrap();
            let second = repo.find(NETWORK, &COLLECTION, &U256::from(2))?.unwrap();
            assert_eq!(first.token_uri, "ipfs://base/1");
            assert_eq!(second.token_uri, "ipfs://base/2");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn drop_created_records_normalised_times() {
        let db = setup();
        run(
            &db,
            ContractEvent::DropCreated {
                drop_id: U256::from(1),
                supply: U256::from(100),
                mint_limit_per_wallet: U256::from(2),
                start_time: U256::from(1_700_000_000u64),
                end_time: U256::from(1_700_086_400_000u64),
                price: U256::from(5),
                has_whitelist_phase: false,
                whitelist_end_time: U256::ZERO,
                whitelist_price: U256::ZERO,
            },
        )
        .unwrap();

        let drops = db
            .with_conn(|conn| AirdropRepository::new(conn).list_by_collection(NETWORK, &COLLECTION))
            .unwrap();
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].minted, U256::ZERO);
        assert_eq!(drops[0].start_time.timestamp(), 1_700_000_000);
        assert_eq!(drops[0].end_time.timestamp(), 1_700_086_400);
    }

    #[test]
    fn crosschain_addresses_append() {
        let db = setup();
        let peer = address!("0x00000000000000000000000000000000000000e1");
        let event = ContractEvent::CrosschainAddressSet {
            network_id: U256::from(137),
            peer,
        };
        run(&db, event.clone()).unwrap();
        run(&db, event).unwrap();

        let peers = db
            .with_conn(|conn| ContractRepository::new(conn).crosschain_addresses(NETWORK, &COLLECTION))
            .unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].peer_network_id, 137);
        assert_eq!(peers[0].peer_address, peer);
    }
}
