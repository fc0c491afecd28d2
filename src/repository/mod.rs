pub mod airdrop_repository;
pub mod contract_repository;
pub mod database;
pub mod listing_repository;
pub mod log_repository;
pub mod models;
pub mod nft_repository;
pub mod processed_tx_repository;
pub mod user_repository;

pub use airdrop_repository::AirdropRepository;
pub use contract_repository::ContractRepository;
pub use database::Database;
pub use listing_repository::ListingRepository;
pub use log_repository::LogRepository;
pub use models::{
    Airdrop, CollectionMetadata, CrosschainAddress, Listing, ListingStatus, LogEntry, Nft,
    NftOwner, Offer, Protocol, TrackedContract, canonical,
};
pub use nft_repository::NftRepository;
pub use processed_tx_repository::ProcessedTxRepository;
pub use user_repository::UserRepository;
