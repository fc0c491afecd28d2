use crate::error::IngestError;
use crate::repository::Protocol;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, U256};

// Which arguments are `indexed` decides the topic count a log must carry;
// a contract deployed with a different layout fails to decode.
pub mod collection721 {
    alloy::sol! {
        event DropCreated(
            uint256 dropId,
            uint256 supply,
            uint256 mintLimitPerWallet,
            uint256 startTime,
            uint256 endTime,
            uint256 price,
            bool hasWhiteListPhase,
            uint256 whiteListEndTime,
            uint256 whiteListPrice
        );
        event TokenMinted(uint256 tokenId, uint256 amount, address indexed holder);
        event BaseURISet(string baseURI);
        event TokenBurned(uint256 tokenId, uint256 amount, address indexed burner);
        event CrosschainAddressSet(uint256 networkId, address contractAddress);
    }
}

pub mod collection1155 {
    alloy::sol! {
        event TokenMinted(uint256 tokenId, string tokenURI, uint256 amount, address indexed holder);
        event TokenBurned(uint256 tokenId, uint256 amount, address indexed burner);
        event CrosschainAddressSet(uint256 networkId, address contractAddress);
    }
}

pub mod marketplace {
    alloy::sol! {
        event Listed(
            uint256 indexed listingId,
            address indexed seller,
            address indexed contractAddress,
            uint256 tokenId,
            uint256 amount,
            uint256 price,
            uint256 tokenType
        );
        event Cancelled(uint256 indexed listingId);
        event Bought(uint256 indexed listingId, address indexed buyer, uint256 price, uint256 amount);
        event OfferMade(
            uint256 indexed listingId,
            address indexed offerer,
            uint256 offerPrice,
            uint256 amount,
            uint256 offerIndex
        );
        event OfferAccepted(
            uint256 indexed listingId,
            address indexed offerer,
            uint256 offerPrice,
            uint256 amount,
            uint256 offerIndex
        );
        event OfferCancelled(uint256 indexed listingId, address indexed offerer, uint256 offerIndex);
    }
}

/// View functions read once when a collection is first seen.
pub mod views {
    alloy::sol! {
        function owner() external view returns (address);
        function name() external view returns (string);
        function symbol() external view returns (string);
        function logoURI() external view returns (string);
        function isBase() external view returns (bool);
    }
}

/// Event types a poller asks a contract for, one log query each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DropCreated,
    TokenMinted,
    BaseUriSet,
    TokenBurned,
    CrosschainAddressSet,
    Listed,
    Cancelled,
    Bought,
    OfferMade,
    OfferAccepted,
    OfferCancelled,
}

const COLLECTION721_ORDER: &[EventKind] = &[
    EventKind::DropCreated,
    EventKind::TokenMinted,
    EventKind::BaseUriSet,
    EventKind::TokenBurned,
    EventKind::CrosschainAddressSet,
];

const COLLECTION1155_ORDER: &[EventKind] = &[
    EventKind::TokenMinted,
    EventKind::TokenBurned,
    EventKind::CrosschainAddressSet,
];

const MARKETPLACE_ORDER: &[EventKind] = &[
    EventKind::Listed,
    EventKind::Cancelled,
    EventKind::Bought,
    EventKind::OfferMade,
    EventKind::OfferAccepted,
    EventKind::OfferCancelled,
];

impl EventKind {
    /// Processing order within one tick. Definitions come before the events
    /// that reference them.
    pub fn ordered_for(protocol: Protocol) -> &'static [EventKind] {
        match protocol {
            Protocol::Erc721 => COLLECTION721_ORDER,
            Protocol::Erc1155 => COLLECTION1155_ORDER,
            Protocol::Marketplace => MARKETPLACE_ORDER,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::DropCreated => "DropCreated",
            EventKind::TokenMinted => "TokenMinted",
            EventKind::BaseUriSet => "BaseURISet",
            EventKind::TokenBurned => "TokenBurned",
            EventKind::CrosschainAddressSet => "CrosschainAddressSet",
            EventKind::Listed => "Listed",
            EventKind::Cancelled => "Cancelled",
            EventKind::Bought => "Bought",
            EventKind::OfferMade => "OfferMade",
            EventKind::OfferAccepted => "OfferAccepted",
            EventKind::OfferCancelled => "OfferCancelled",
        }
    }

    /// topic0 of this event as emitted by a contract of `protocol`.
    pub fn signature_hash(&self, protocol: Protocol) -> Result<B256, IngestError> {
        let hash = match (protocol, self) {
            (Protocol::Erc721, EventKind::DropCreated) => collection721::DropCreated::SIGNATURE_HASH,
            (Protocol::Erc721, EventKind::TokenMinted) => collection721::TokenMinted::SIGNATURE_HASH,
            (Protocol::Erc721, EventKind::BaseUriSet) => collection721::BaseURISet::SIGNATURE_HASH,
            (Protocol::Erc721, EventKind::TokenBurned) => collection721::TokenBurned::SIGNATURE_HASH,
            (Protocol::Erc721, EventKind::CrosschainAddressSet) => {
                collection721::CrosschainAddressSet::SIGNATURE_HASH
            }
            (Protocol::Erc1155, EventKind::TokenMinted) => {
                collection1155::TokenMinted::SIGNATURE_HASH
            }
            (Protocol::Erc1155, EventKind::TokenBurned) => {
                collection1155::TokenBurned::SIGNATURE_HASH
            }
            (Protocol::Erc1155, EventKind::CrosschainAddressSet) => {
                collection1155::CrosschainAddressSet::SIGNATURE_HASH
            }
            (Protocol::Marketplace, EventKind::Listed) => marketplace::Listed::SIGNATURE_HASH,
            (Protocol::Marketplace, EventKind::Cancelled) => marketplace::Cancelled::SIGNATURE_HASH,
            (Protocol::Marketplace, EventKind::Bought) => marketplace::Bought::SIGNATURE_HASH,
            (Protocol::Marketplace, EventKind::OfferMade) => marketplace::OfferMade::SIGNATURE_HASH,
            (Protocol::Marketplace, EventKind::OfferAccepted) => {
                marketplace::OfferAccepted::SIGNATURE_HASH
            }
            (Protocol::Marketplace, EventKind::OfferCancelled) => {
                marketplace::OfferCancelled::SIGNATURE_HASH
            }
            (protocol, kind) => {
                return Err(IngestError::UnsupportedProtocol(format!(
                    "{} does not emit {}",
                    protocol,
                    kind.name()
                )));
            }
        };
        Ok(hash)
    }
}

/// A decoded contract event. Produced once at the log-fetch boundary and
/// dispatched to handlers by exhaustive match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractEvent {
    DropCreated {
        drop_id: U256,
        supply: U256,
        mint_limit_per_wallet: U256,
        start_time: U256,
        end_time: U256,
        price: U256,
        has_whitelist_phase: bool,
        whitelist_end_time: U256,
        whitelist_price: U256,
    },
    TokenMinted {
        token_id: U256,
        /// Only ERC-1155 collections announce a per-token URI.
        token_uri: Option<String>,
        amount: U256,
        holder: Address,
    },
    BaseUriSet {
        base_uri: String,
    },
    TokenBurned {
        token_id: U256,
        amount: U256,
        burner: Address,
    },
    CrosschainAddressSet {
        network_id: U256,
        peer: Address,
    },
    Listed {
        listing_id: U256,
        seller: Address,
        collection: Address,
        token_id: U256,
        amount: U256,
        price: U256,
        token_type: U256,
    },
    Cancelled {
        listing_id: U256,
    },
    Bought {
        listing_id: U256,
        buyer: Address,
        price: U256,
        amount: U256,
    },
    OfferMade {
        listing_id: U256,
        offerer: Address,
        price: U256,
        amount: U256,
        offer_index: U256,
    },
    OfferAccepted {
        listing_id: U256,
        offerer: Address,
        price: U256,
        amount: U256,
        offer_index: U256,
    },
    OfferCancelled {
        listing_id: U256,
        offerer: Address,
        offer_index: U256,
    },
}

impl ContractEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ContractEvent::DropCreated { .. } => EventKind::DropCreated,
            ContractEvent::TokenMinted { .. } => EventKind::TokenMinted,
            ContractEvent::BaseUriSet { .. } => EventKind::BaseUriSet,
            ContractEvent::TokenBurned { .. } => EventKind::TokenBurned,
            ContractEvent::CrosschainAddressSet { .. } => EventKind::CrosschainAddressSet,
            ContractEvent::Listed { .. } => EventKind::Listed,
            ContractEvent::Cancelled { .. } => EventKind::Cancelled,
            ContractEvent::Bought { .. } => EventKind::Bought,
            ContractEvent::OfferMade { .. } => EventKind::OfferMade,
            ContractEvent::OfferAccepted { .. } => EventKind::OfferAccepted,
            ContractEvent::OfferCancelled { .. } => EventKind::OfferCancelled,
        }
    }
}

/// One fetched log, reduced to what the ingestion pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
    pub event: ContractEvent,
}

impl DecodedLog {
    /// Key recorded in the dedup cache.
    ///
    /// A single transaction may emit several logs the poller cares about
    /// (a batch mint, a drop created and minted in one call), so the log index
    /// is part of the key.
    pub fn dedup_key(&self) -> String {
        format!("{:?}-{}", self.transaction_hash, self.log_index)
    }
}

fn decode_raw<E: SolEvent>(log: &Log) -> Result<E, IngestError> {
    E::decode_raw_log(log.topics(), &log.data().data).map_err(|e| IngestError::Decode {
        event: E::SIGNATURE,
        reason: e.to_string(),
    })
}

pub fn decode_log(protocol: Protocol, kind: EventKind, log: &Log) -> Result<DecodedLog, IngestError> {
    let event = match (protocol, kind) {
        (Protocol::Erc721, EventKind::DropCreated) => {
            let e: collection721::DropCreated = decode_raw(log)?;
            ContractEvent::DropCreated {
                drop_id: e.dropId,
                supply: e.supply,
                mint_limit_per_wallet: e.mintLimitPerWallet,
                start_time: e.startTime,
                end_time: e.endTime,
                price: e.price,
                has_whitelist_phase: e.hasWhiteListPhase,
                whitelist_end_time: e.whiteListEndTime,
                whitelist_price: e.whiteListPrice,
            }
        }
        (Protocol::Erc721, EventKind::TokenMinted) => {
            let e: collection721::TokenMinted = decode_raw(log)?;
            ContractEvent::TokenMinted {
                token_id: e.tokenId,
                token_uri: None,
                amount: e.amount,
                holder: e.holder,
            }
        }
        (Protocol::Erc721, EventKind::BaseUriSet) => {
            let e: collection721::BaseURISet = decode_raw(log)?;
            ContractEvent::BaseUriSet {
                base_uri: e.baseURI,
            }
        }
        (Protocol::Erc721, EventKind::TokenBurned) => {
            let e: collection721::TokenBurned = decode_raw(log)?;
            ContractEvent::TokenBurned {
                token_id: e.tokenId,
                amount: e.amount,
                burner: e.burner,
            }
        }
        (Protocol::Erc721, EventKind::CrosschainAddressSet) => {
            let e: collection721::CrosschainAddressSet = decode_raw(log)?;
            ContractEvent::CrosschainAddressSet {
                network_id: e.networkId,
                peer: e.contractAddress,
            }
        }
        (Protocol::Erc1155, EventKind::TokenMinted) => {
            let e: collection1155::TokenMinted = decode_raw(log)?;
            ContractEvent::TokenMinted {
                token_id: e.tokenId,
                token_uri: Some(e.tokenURI),
                amount: e.amount,
                holder: e.holder,
            }
        }
        (Protocol::Erc1155, EventKind::TokenBurned) => {
            let e: collection1155::TokenBurned = decode_raw(log)?;
            ContractEvent::TokenBurned {
                token_id: e.tokenId,
                amount: e.amount,
                burner: e.burner,
            }
        }
        (Protocol::Erc1155, EventKind::CrosschainAddressSet) => {
            let e: collection1155::CrosschainAddressSet = decode_raw(log)?;
            ContractEvent::CrosschainAddressSet {
                network_id: e.networkId,
                peer: e.contractAddress,
            }
        }
        (Protocol::Marketplace, EventKind::Listed) => {
            let e: marketplace::Listed = decode_raw(log)?;
            ContractEvent::Listed {
                listing_id: e.listingId,
                seller: e.seller,
                collection: e.contractAddress,
                token_id: e.tokenId,
                amount: e.amount,
                price: e.price,
                token_type: e.tokenType,
            }
        }
        (Protocol::Marketplace, EventKind::Cancelled) => {
            let e: marketplace::Cancelled = decode_raw(log)?;
            ContractEvent::Cancelled {
                listing_id: e.listingId,
            }
        }
        (Protocol::Marketplace, EventKind::Bought) => {
            let e: marketplace::Bought = decode_raw(log)?;
            ContractEvent::Bought {
                listing_id: e.listingId,
                buyer: e.buyer,
                price: e.price,
                amount: e.amount,
            }
        }
        (Protocol::Marketplace, EventKind::OfferMade) => {
            let e: marketplace::OfferMade = decode_raw(log)?;
            ContractEvent::OfferMade {
                listing_id: e.listingId,
                offerer: e.offerer,
                price: e.offerPrice,
                amount: e.amount,
                offer_index: e.offerIndex,
            }
        }
        (Protocol::Marketplace, EventKind::OfferAccepted) => {
            let e: marketplace::OfferAccepted = decode_raw(log)?;
            ContractEvent::OfferAccepted {
                listing_id: e.listingId,
                offerer: e.offerer,
                price: e.offerPrice,
                amount: e.amount,
                offer_index: e.offerIndex,
            }
        }
        (Protocol::Marketplace, EventKind::OfferCancelled) => {
            let e: marketplace::OfferCancelled = decode_raw(log)?;
            ContractEvent::OfferCancelled {
                listing_id: e.listingId,
                offerer: e.offerer,
                offer_index: e.offerIndex,
            }
        }
        (protocol, kind) => {
            return Err(IngestError::UnsupportedProtocol(format!(
                "{} does not emit {}",
                protocol,
                kind.name()
            )));
        }
    };

    let transaction_hash = log.transaction_hash.ok_or_else(|| IngestError::Decode {
        event: kind.name(),
        reason: "log has no transaction hash".to_string(),
    })?;
    let block_number = log.block_number.ok_or_else(|| IngestError::Decode {
        event: kind.name(),
        reason: "log has no block number".to_string(),
    })?;

    Ok(DecodedLog {
        transaction_hash,
        block_number,
        log_index: log.log_index.unwrap_or_default(),
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{LogData, address, b256};

    fn rpc_log(data: LogData) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: address!("0x00000000000000000000000000000000000000c1"),
                data,
            },
            block_number: Some(120),
            transaction_hash: Some(b256!(
                "0x00000000000000000000000000000000000000000000000000000000000000aa"
            )),
            log_index: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn ordering_puts_definitions_first() {
        let order = EventKind::ordered_for(Protocol::Erc721);
        let drop = order.iter().position(|k| *k == EventKind::DropCreated).unwrap();
        let mint = order.iter().position(|k| *k == EventKind::TokenMinted).unwrap();
        let burn = order.iter().position(|k| *k == EventKind::TokenBurned).unwrap();
        assert!(drop < mint && mint < burn);

        let order = EventKind::ordered_for(Protocol::Marketplace);
        assert_eq!(order.first(), Some(&EventKind::Listed));
    }

    #[test]
    fn mint_signatures_differ_between_standards() {
        let a = EventKind::TokenMinted.signature_hash(Protocol::Erc721).unwrap();
        let b = EventKind::TokenMinted.signature_hash(Protocol::Erc1155).unwrap();
        assert_ne!(a, b);
        assert!(EventKind::Listed.signature_hash(Protocol::Erc1155).is_err());
    }

    #[test]
    fn decodes_1155_mint() {
        let holder = address!("0x00000000000000000000000000000000000000a1");
        let event = collection1155::TokenMinted {
            tokenId: U256::from(5),
            tokenURI: "ipfs://token/5".to_string(),
            amount: U256::from(3),
            holder,
        };
        let log = rpc_log(event.encode_log_data());

        let decoded = decode_log(Protocol::Erc1155, EventKind::TokenMinted, &log).unwrap();
        assert_eq!(decoded.block_number, 120);
        assert_eq!(
            decoded.event,
            ContractEvent::TokenMinted {
                token_id: U256::from(5),
                token_uri: Some("ipfs://token/5".to_string()),
                amount: U256::from(3),
                holder,
            }
        );
        assert!(decoded.dedup_key().ends_with("-3"));
    }

    #[test]
    fn indexed_argument_layout() {
        let who = address!("0x00000000000000000000000000000000000000a1");
        let mint = collection721::TokenMinted {
            tokenId: U256::from(1),
            amount: U256::from(1),
            holder: who,
        };
        assert_eq!(mint.encode_log_data().topics().len(), 2);

        let listed = marketplace::Listed {
            listingId: U256::from(1),
            seller: who,
            contractAddress: who,
            tokenId: U256::from(1),
            amount: U256::from(1),
            price: U256::from(1),
            tokenType: U256::from(1),
        };
        assert_eq!(listed.encode_log_data().topics().len(), 4);

        let crosschain = collection1155::CrosschainAddressSet {
            networkId: U256::from(1),
            contractAddress: who,
        };
        assert_eq!(crosschain.encode_log_data().topics().len(), 1);
    }

    #[test]
    fn wrong_event_shape_is_a_decode_error() {
        let event = marketplace::Cancelled {
            listingId: U256::from(1),
        };
        let log = rpc_log(event.encode_log_data());
        let err = decode_log(Protocol::Marketplace, EventKind::Bought, &log).unwrap_err();
        assert!(matches!(err, IngestError::Decode { .. }));
    }
}
