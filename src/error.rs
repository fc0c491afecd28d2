use alloy_primitives::{Address, U256};
use thiserror::Error;

/// Failures raised while turning a decoded event into a projection mutation.
///
/// These are permanent: retrying the same input yields the same error, so the
/// retry wrapper hands them straight back to the poller instead of looping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("Invalid collection {address:?} on network {network_id}")]
    UnknownCollection { network_id: u64, address: Address },

    #[error("Invalid NFT {collection:?}/{token_id}")]
    UnknownToken { collection: Address, token_id: U256 },

    #[error("Invalid listing {listing_id} on network {network_id}")]
    UnknownListing { network_id: u64, listing_id: U256 },

    #[error("Invalid offer {listing_id}/{offer_index}")]
    UnknownOffer { listing_id: U256, offer_index: U256 },

    #[error("{owner:?} holds {held} of token {token_id}, cannot remove {requested}")]
    InsufficientBalance {
        owner: Address,
        token_id: U256,
        held: U256,
        requested: U256,
    },

    #[error("Amount {requested} exceeds remaining amount {remaining} of listing {listing_id}")]
    ListingAmountExceeded {
        listing_id: U256,
        remaining: U256,
        requested: U256,
    },

    #[error("Failed to decode {event} log: {reason}")]
    Decode { event: &'static str, reason: String },

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),
}

/// Decides whether an error is worth retrying.
///
/// Handler failures are permanent. SQLite lock contention is transient.
/// Anything else is treated as an infrastructure hiccup (transport reset,
/// timeout, rate limit) and retried.
pub fn is_transient(error: &anyhow::Error) -> bool {
    if error.downcast_ref::<IngestError>().is_some() {
        return false;
    }

    if let Some(sqlite) = error.downcast_ref::<rusqlite::Error>() {
        return matches!(
            sqlite.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
        );
    }

    true
}

/// Short label used when logging a failure before a retry.
pub fn classify(error: &anyhow::Error) -> &'static str {
    if let Some(ingest) = error.downcast_ref::<IngestError>() {
        return match ingest {
            IngestError::UnknownCollection { .. } => "UnknownCollection",
            IngestError::UnknownToken { .. } => "UnknownToken",
            IngestError::UnknownListing { .. } => "UnknownListing",
            IngestError::UnknownOffer { .. } => "UnknownOffer",
            IngestError::InsufficientBalance { .. } => "InsufficientBalance",
            IngestError::ListingAmountExceeded { .. } => "ListingAmountExceeded",
            IngestError::Decode { .. } => "Decode",
            IngestError::UnsupportedProtocol(_) => "UnsupportedProtocol",
        };
    }

    if error.downcast_ref::<rusqlite::Error>().is_some() {
        return "Database";
    }

    let message = error.to_string().to_lowercase();
    if message.contains("timeout") {
        "Timeout"
    } else if message.contains("429") || message.contains("rate limit") {
        "RateLimited"
    } else {
        "Rpc"
    }
}
