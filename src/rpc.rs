use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionInput, TransactionRequest};
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, B256, Bytes};
use anyhow::Result;
use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120); // 2 minutes timeout per request

/// JSON-RPC access to one network, rotating between its endpoints on failure.
///
/// Calls make a single attempt; callers wrap them in [`crate::retry::retry`].
#[derive(Clone)]
pub struct RpcClient {
    network_id: u64,
    providers: Vec<DynProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
}

impl RpcClient {
    pub fn new(network_id: u64, rpc_urls: &[String]) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!(
                "At least one RPC URL must be provided for network {}",
                network_id
            ));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            let provider = ProviderBuilder::new().connect_http(parsed_url).erased();
            providers.push(provider);
        }

        Ok(RpcClient {
            network_id,
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn network_id(&self) -> u64 {
        self.network_id
    }

    fn get_provider(&self) -> &DynProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{} for network {}", next, self.network_id);
        }
    }

    fn handle_error(&self, error_str: &str) {
        let current_url = self.get_current_url();
        warn!(
            "RPC error on {}: {}, rotating provider",
            current_url, error_str
        );
        self.rotate_provider();
    }

    fn handle_timeout(&self) -> anyhow::Error {
        let current_url = self.get_current_url();
        warn!(
            "Request timeout after {} seconds on {}, rotating provider",
            REQUEST_TIMEOUT.as_secs(),
            current_url
        );
        self.rotate_provider();
        anyhow::anyhow!(
            "Request timeout after {} seconds",
            REQUEST_TIMEOUT.as_secs()
        )
    }

    pub async fn get_latest_block(&self) -> Result<u64> {
        let provider = self.get_provider();
        match timeout(REQUEST_TIMEOUT, provider.get_block_number()).await {
            Ok(Ok(block_number)) => Ok(block_number),
            Ok(Err(e)) => {
                self.handle_error(&e.to_string());
                Err(anyhow::anyhow!("{}", e))
            }
            Err(_) => Err(self.handle_timeout()),
        }
    }

    /// `eth_call` against the latest block, decoding the return value of `C`.
    pub async fn call_contract<C: SolCall>(&self, address: Address, call: C) -> Result<C::Return> {
        let request = TransactionRequest::default()
            .to(address)
            .input(TransactionInput::new(Bytes::from(call.abi_encode())));

        let provider = self.get_provider();
        let output = match timeout(REQUEST_TIMEOUT, provider.call(request)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.handle_error(&e.to_string());
                return Err(anyhow::anyhow!("{}", e));
            }
            Err(_) => return Err(self.handle_timeout()),
        };

        C::abi_decode_returns(&output)
            .map_err(|e| anyhow::anyhow!("Failed to decode {} result: {}", C::SIGNATURE, e))
    }

    async fn get_logs_once(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: Address,
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let provider = self.get_provider();
        let filter = Filter::new()
            .address(contract_address)
            .event_signature(topic0)
            .from_block(from_block)
            .to_block(to_block);

        match timeout(REQUEST_TIMEOUT, provider.get_logs(&filter)).await {
            Ok(Ok(logs)) => Ok(logs),
            Ok(Err(e)) => {
                let error_str = e.to_string();
                // An oversized range is not the endpoint's fault; keep it.
                if !error_str.contains("exceeds max results") {
                    self.handle_error(&error_str);
                }
                Err(anyhow::anyhow!("{}", e))
            }
            Err(_) => Err(self.handle_timeout()),
        }
    }

    fn parse_max_results_error(error_str: &str) -> Option<(u64, u64)> {
        let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        let captures = re.captures(error_str)?;

        let from = captures.get(1)?.as_str().parse().ok()?;
        let to = captures.get(2)?.as_str().parse().ok()?;

        Some((from, to))
    }

    /// Logs of one event signature in `[from_block, to_block]`, ascending.
    ///
    /// When the endpoint rejects the range as too large and suggests a smaller
    /// one, the range is split at the suggestion and the remainder fetched.
    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: Address,
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let mut all_logs = Vec::new();
        let mut current_from = from_block;

        while current_from <= to_block {
            match self
                .get_logs_once(current_from, to_block, contract_address, topic0)
                .await
            {
                Ok(logs) => {
                    all_logs.extend(logs);
                    break;
                }
                Err(e) => {
                    let error_str = e.to_string();
                    let suggestion = error_str
                        .contains("exceeds max results")
                        .then(|| Self::parse_max_results_error(&error_str))
                        .flatten();

                    match suggestion {
                        Some((suggested_from, suggested_to))
                            if suggested_from == current_from && suggested_to < to_block =>
                        {
                            info!(
                                "Hit max results limit for blocks {}-{}, splitting at block {}",
                                current_from, to_block, suggested_to
                            );
                            let logs = self
                                .get_logs_once(suggested_from, suggested_to, contract_address, topic0)
                                .await?;
                            all_logs.extend(logs);
                            current_from = suggested_to + 1;
                        }
                        _ => return Err(e),
                    }
                }
            }
        }

        Ok(all_logs)
    }
}
