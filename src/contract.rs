use crate::error::IngestError;
use crate::events::{DecodedLog, EventKind, decode_log, views};
use crate::repository::{CollectionMetadata, Protocol};
use crate::rpc::RpcClient;
use alloy_primitives::Address;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Read-only binding to one deployed collection or marketplace contract.
///
/// Every method is an idempotent read; connectivity failures surface as
/// ordinary (transient) errors for the retry wrapper to deal with.
#[async_trait]
pub trait ContractClient: Send + Sync {
    fn network_id(&self) -> u64;

    fn address(&self) -> Address;

    fn protocol(&self) -> Protocol;

    async fn block_number(&self) -> Result<u64>;

    /// Logs of one event type in `[from_block, to_block]`, ascending by block.
    async fn query_filter(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<DecodedLog>>;

    /// Immutable collection facts. Marketplaces have none.
    async fn collection_metadata(&self) -> Result<CollectionMetadata>;
}

/// Builds contract clients for the networks the process is configured for.
pub trait ClientFactory: Send + Sync {
    fn connect(
        &self,
        network_id: u64,
        address: Address,
        protocol: Protocol,
    ) -> Result<Arc<dyn ContractClient>>;
}

pub struct AlloyContractClient {
    rpc: RpcClient,
    address: Address,
    protocol: Protocol,
}

impl AlloyContractClient {
    pub fn new(rpc: RpcClient, address: Address, protocol: Protocol) -> Self {
        Self {
            rpc,
            address,
            protocol,
        }
    }
}

#[async_trait]
impl ContractClient for AlloyContractClient {
    fn network_id(&self) -> u64 {
        self.rpc.network_id()
    }

    fn address(&self) -> Address {
        self.address
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn block_number(&self) -> Result<u64> {
        self.rpc.get_latest_block().await
    }

    async fn query_filter(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<DecodedLog>> {
        let topic0 = kind.signature_hash(self.protocol)?;
        let logs = self
            .rpc
            .get_logs(from_block, to_block, self.address, topic0)
            .await?;

        let mut decoded = logs
            .iter()
            .filter(|log| !log.removed)
            .map(|log| decode_log(self.protocol, kind, log))
            .collect::<Result<Vec<_>, IngestError>>()?;
        decoded.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(decoded)
    }

    async fn collection_metadata(&self) -> Result<CollectionMetadata> {
        if !self.protocol.is_collection() {
            return Err(IngestError::UnsupportedProtocol(format!(
                "{} has no collection metadata",
                self.protocol
            ))
            .into());
        }

        info!("Fetching collection metadata for {:?}", self.address);

        let (owner, name, symbol, logo_uri, is_base) = futures::try_join!(
            self.rpc.call_contract(self.address, views::ownerCall {}),
            self.rpc.call_contract(self.address, views::nameCall {}),
            self.rpc.call_contract(self.address, views::symbolCall {}),
            self.rpc.call_contract(self.address, views::logoURICall {}),
            self.rpc.call_contract(self.address, views::isBaseCall {}),
        )
        .with_context(|| format!("reading metadata of {:?}", self.address))?;

        Ok(CollectionMetadata {
            owner,
            name,
            symbol,
            logo_uri,
            is_base,
        })
    }
}

/// One [`RpcClient`] per configured network.
#[derive(Clone, Default)]
pub struct RpcRegistry {
    clients: HashMap<u64, RpcClient>,
}

impl RpcRegistry {
    pub fn from_urls(urls: &HashMap<u64, Vec<String>>) -> Result<Self> {
        let mut clients = HashMap::new();
        for (network_id, network_urls) in urls {
            clients.insert(*network_id, RpcClient::new(*network_id, network_urls)?);
        }
        Ok(Self { clients })
    }

    pub fn networks(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl ClientFactory for RpcRegistry {
    fn connect(
        &self,
        network_id: u64,
        address: Address,
        protocol: Protocol,
    ) -> Result<Arc<dyn ContractClient>> {
        let rpc = self
            .clients
            .get(&network_id)
            .ok_or_else(|| anyhow!("No RPC URL found for network ID: {}", network_id))?;
        Ok(Arc::new(AlloyContractClient::new(
            rpc.clone(),
            address,
            protocol,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn unknown_network_is_rejected() {
        let mut urls = HashMap::new();
        urls.insert(5, vec!["http://localhost:8545".to_string()]);
        let registry = RpcRegistry::from_urls(&urls).unwrap();
        assert_eq!(registry.networks(), vec![5]);

        let addr = address!("0x00000000000000000000000000000000000000c1");
        assert!(registry.connect(5, addr, Protocol::Erc721).is_ok());
        let err = registry.connect(7, addr, Protocol::Erc721).err().unwrap();
        assert!(err.to_string().contains("network ID: 7"));
    }
}
