use crate::contract::ClientFactory;
use crate::dedup::{ProcessedTxStore, SqliteTxStore};
use crate::repository::{ContractRepository, Database, LogRepository, Protocol};
use crate::scheduler::{Poller, PollerConfig};
use alloy_primitives::Address;
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

struct PollerHandle {
    protocol: Protocol,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A poller task as seen from the outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningPoller {
    pub network_id: u64,
    pub address: Address,
    pub protocol: Protocol,
}

/// Owns one long-lived poller task per tracked contract.
pub struct Supervisor {
    db: Database,
    factory: Arc<dyn ClientFactory>,
    store: Arc<dyn ProcessedTxStore>,
    config: PollerConfig,
    root: CancellationToken,
    tasks: Mutex<HashMap<(u64, Address), PollerHandle>>,
}

impl Supervisor {
    pub fn new(db: Database, factory: Arc<dyn ClientFactory>, config: PollerConfig) -> Self {
        let store = Arc::new(SqliteTxStore::new(db.clone(), config.retention));
        Self::with_store(db, factory, store, config)
    }

    pub fn with_store(
        db: Database,
        factory: Arc<dyn ClientFactory>,
        store: Arc<dyn ProcessedTxStore>,
        config: PollerConfig,
    ) -> Self {
        Self {
            db,
            factory,
            store,
            config,
            root: CancellationToken::new(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts polling `address` now. Returns `false` if a poller for it is
    /// already running.
    pub fn start_polling(&self, address: Address, network_id: u64, protocol: Protocol) -> Result<bool> {
        self.start_polling_after(address, network_id, protocol, Duration::ZERO)
    }

    pub fn start_polling_after(
        &self,
        address: Address,
        network_id: u64,
        protocol: Protocol,
        delay: Duration,
    ) -> Result<bool> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| anyhow!("supervisor task map poisoned"))?;

        let key = (network_id, address);
        if tasks.get(&key).is_some_and(|t| !t.handle.is_finished()) {
            return Ok(false);
        }

        let client = self.factory.connect(network_id, address, protocol)?;
        let cancel = self.root.child_token();
        let task_cancel = cancel.clone();
        let db = self.db.clone();
        let log_db = self.db.clone();
        let store = self.store.clone();
        let config = self.config.clone();

        let task = async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    _ = sleep(delay) => {}
                }
            }

            let poller = tokio::select! {
                _ = task_cancel.cancelled() => return,
                result = Poller::init(client, db, store, config) => match result {
                    Ok(poller) => poller,
                    Err(e) => {
                        error!("Failed to start poller: {e:#}");
                        let content = format!(
                            "{:?} on network {} failed to start: {e:#}",
                            address, network_id
                        );
                        if let Err(e) = log_db
                            .with_conn(|conn| LogRepository::new(conn).record("error", &content))
                        {
                            warn!("Failed to write ingest log entry: {e:#}");
                        }
                        return;
                    }
                },
            };
            poller.run(task_cancel).await;
        }
        .instrument(info_span!("supervised", network_id, contract = %address));

        tasks.insert(
            key,
            PollerHandle {
                protocol,
                cancel,
                handle: tokio::spawn(task),
            },
        );
        info!(
            "Scheduled {} poller for {:?} on network {} in {:?}",
            protocol, address, network_id, delay
        );
        Ok(true)
    }

    /// Cancels one poller and waits for it to wind down.
    pub async fn stop(&self, network_id: u64, address: &Address) -> Result<bool> {
        let removed = self
            .tasks
            .lock()
            .map_err(|_| anyhow!("supervisor task map poisoned"))?
            .remove(&(network_id, *address));

        let Some(poller) = removed else {
            return Ok(false);
        };
        poller.cancel.cancel();
        if let Err(e) = poller.handle.await {
            warn!("Poller for {:?} ended abnormally: {}", address, e);
        }
        Ok(true)
    }

    pub fn running(&self) -> Vec<RunningPoller> {
        let Ok(tasks) = self.tasks.lock() else {
            return Vec::new();
        };
        let mut running: Vec<RunningPoller> = tasks
            .iter()
            .filter(|(_, t)| !t.handle.is_finished())
            .map(|((network_id, address), t)| RunningPoller {
                network_id: *network_id,
                address: *address,
                protocol: t.protocol,
            })
            .collect();
        running.sort_by_key(|p| (p.network_id, p.address));
        running
    }

    /// Starts a poller for every stored contract, spreading the starts evenly
    /// across one poll interval. Returns how many were scheduled.
    pub fn rehydrate(&self) -> Result<usize> {
        let contracts = self
            .db
            .with_conn(|conn| ContractRepository::new(conn).list())?;
        let delays = stagger_delays(self.config.interval, contracts.len());

        let mut started = 0;
        for (contract, delay) in contracts.iter().zip(delays) {
            match self.start_polling_after(
                contract.address,
                contract.network_id,
                contract.protocol,
                delay,
            ) {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    "Skipping {:?} on network {}: {e:#}",
                    contract.address, contract.network_id
                ),
            }
        }

        info!("Rehydrated {} of {} tracked contracts", started, contracts.len());
        Ok(started)
    }

    /// Cancels every poller and waits for all of them.
    pub async fn shutdown(&self) {
        self.root.cancel();

        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain().map(|(_, t)| t.handle).collect(),
            Err(_) => Vec::new(),
        };

        let count = handles.len();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Poller ended abnormally: {}", e);
            }
        }
        info!("Stopped {} pollers", count);
    }
}

/// Start offsets `i * interval / count` for `count` pollers.
pub fn stagger_delays(interval: Duration, count: usize) -> Vec<Duration> {
    if count == 0 {
        return Vec::new();
    }
    let spacing = interval / count as u32;
    (0..count as u32).map(|i| spacing * i).collect()
}
