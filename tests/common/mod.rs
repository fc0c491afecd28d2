#![allow(dead_code)]

use alloy_primitives::{Address, B256, U256, address};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use nft_market_indexer::contract::{ClientFactory, ContractClient};
use nft_market_indexer::events::{ContractEvent, DecodedLog, EventKind};
use nft_market_indexer::repository::{
    CollectionMetadata, ContractRepository, Database, Protocol, TrackedContract,
};
use nft_market_indexer::scheduler::PollerConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NETWORK: u64 = 5;
pub const COLLECTION: Address = address!("0x00000000000000000000000000000000000000c1");
pub const MARKET: Address = address!("0x00000000000000000000000000000000000000d1");
pub const USER1: Address = address!("0x00000000000000000000000000000000000000a1");
pub const USER2: Address = address!("0x00000000000000000000000000000000000000a2");

/// Contract client answering from a script: a settable head, canned logs and
/// a number of injected transient failures.
pub struct MockContractClient {
    network_id: u64,
    address: Address,
    protocol: Protocol,
    head: AtomicU64,
    logs: Mutex<Vec<DecodedLog>>,
    failures_left: AtomicUsize,
    pub head_calls: AtomicUsize,
    pub queries: Mutex<Vec<(EventKind, u64, u64)>>,
    metadata: CollectionMetadata,
}

impl MockContractClient {
    pub fn new(network_id: u64, address: Address, protocol: Protocol, head: u64) -> Arc<Self> {
        Arc::new(Self {
            network_id,
            address,
            protocol,
            head: AtomicU64::new(head),
            logs: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
            head_calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
            metadata: CollectionMetadata {
                owner: USER2,
                name: "Mock Collection".to_string(),
                symbol: "MOCK".to_string(),
                logo_uri: "ipfs://logo".to_string(),
                is_base: false,
            },
        })
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn fail_next(&self, times: usize) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub fn push_log(&self, tx: u8, block_number: u64, log_index: u64, event: ContractEvent) {
        self.logs.lock().unwrap().push(DecodedLog {
            transaction_hash: B256::with_last_byte(tx),
            block_number,
            log_index,
            event,
        });
    }

    pub fn windows_for(&self, kind: EventKind) -> Vec<(u64, u64)> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, from, to)| (*from, *to))
            .collect()
    }

    fn maybe_fail(&self) -> Result<()> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(anyhow!("connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl ContractClient for MockContractClient {
    fn network_id(&self) -> u64 {
        self.network_id
    }

    fn address(&self) -> Address {
        self.address
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn block_number(&self) -> Result<u64> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn query_filter(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<DecodedLog>> {
        self.maybe_fail()?;
        self.queries.lock().unwrap().push((kind, from_block, to_block));

        let mut logs: Vec<DecodedLog> = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.event.kind() == kind)
            .filter(|log| log.block_number >= from_block && log.block_number <= to_block)
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn collection_metadata(&self) -> Result<CollectionMetadata> {
        self.maybe_fail()?;
        Ok(self.metadata.clone())
    }
}

#[derive(Default)]
pub struct MockFactory {
    clients: Mutex<HashMap<(u64, Address), Arc<MockContractClient>>>,
}

impl MockFactory {
    pub fn add(&self, client: Arc<MockContractClient>) {
        self.clients
            .lock()
            .unwrap()
            .insert((client.network_id, client.address), client);
    }
}

impl ClientFactory for MockFactory {
    fn connect(
        &self,
        network_id: u64,
        address: Address,
        _protocol: Protocol,
    ) -> Result<Arc<dyn ContractClient>> {
        let client = self
            .clients
            .lock()
            .unwrap()
            .get(&(network_id, address))
            .cloned()
            .ok_or_else(|| anyhow!("No RPC URL found for network ID: {}", network_id))?;
        Ok(client as Arc<dyn ContractClient>)
    }
}

pub fn fast_config() -> PollerConfig {
    PollerConfig {
        interval: Duration::from_millis(20),
        retry_pause: Duration::from_millis(1),
        ..PollerConfig::default()
    }
}

pub fn track(db: &Database, address: Address, protocol: Protocol, cursor: u64) {
    db.with_conn(|conn| {
        ContractRepository::new(conn).insert(&TrackedContract {
            network_id: NETWORK,
            address,
            protocol,
            last_filter_block: cursor,
            metadata: None,
            base_uri: None,
        })
    })
    .unwrap();
}

pub fn cursor(db: &Database, address: Address) -> u64 {
    db.with_conn(|conn| ContractRepository::new(conn).get_last_filter_block(NETWORK, &address))
        .unwrap()
        .unwrap()
}

pub fn mint_1155(token_id: u64, amount: u64, holder: Address) -> ContractEvent {
    ContractEvent::TokenMinted {
        token_id: U256::from(token_id),
        token_uri: Some(format!("ipfs://token/{token_id}")),
        amount: U256::from(amount),
        holder,
    }
}
