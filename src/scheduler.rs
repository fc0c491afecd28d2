use crate::contract::ContractClient;
use crate::cursor::{BLOCK_WINDOW, CursorStore, ScanWindow, scan_window};
use crate::dedup::{DEFAULT_CAPACITY, DEFAULT_RETENTION, ProcessedTxStore, TxDedupCache};
use crate::error::classify;
use crate::events::{DecodedLog, EventKind};
use crate::handlers::{self, HandlerContext};
use crate::repository::{ContractRepository, Database, LogRepository, TrackedContract, UserRepository};
use crate::retry::{DEFAULT_RETRY_PAUSE, retry_with_pause};
use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

const PURGE_EVERY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Fixed delay between the end of one tick and the start of the next.
    pub interval: Duration,
    pub window: u64,
    pub dedup_capacity: usize,
    /// Blocks behind the head a newly tracked contract starts at.
    pub initial_lag: u64,
    pub confirmations: u64,
    pub retry_pause: Duration,
    pub retention: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            window: BLOCK_WINDOW,
            dedup_capacity: DEFAULT_CAPACITY,
            initial_lag: 10,
            confirmations: 0,
            retry_pause: DEFAULT_RETRY_PAUSE,
            retention: DEFAULT_RETENTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub window: ScanWindow,
    pub applied: usize,
    pub skipped: usize,
}

/// Returns the stored record for the client's contract, creating it on first
/// sight from the chain: metadata for collections, and a cursor
/// `initial_lag` blocks behind the confirmed head.
pub async fn ensure_tracked(
    client: &dyn ContractClient,
    db: &Database,
    config: &PollerConfig,
) -> Result<TrackedContract> {
    let network_id = client.network_id();
    let address = client.address();

    if let Some(existing) =
        db.with_conn(|conn| ContractRepository::new(conn).find(network_id, &address))?
    {
        if existing.protocol != client.protocol() {
            bail!(
                "{:?} on network {} is tracked as {}, not {}",
                address,
                network_id,
                existing.protocol,
                client.protocol()
            );
        }
        return Ok(existing);
    }

    let metadata = if client.protocol().is_collection() {
        Some(
            retry_with_pause(config.retry_pause, "collection_metadata", || {
                client.collection_metadata()
            })
            .await?,
        )
    } else {
        None
    };

    let head = retry_with_pause(config.retry_pause, "block_number", || client.block_number()).await?;
    let start = head
        .saturating_sub(config.confirmations)
        .saturating_sub(config.initial_lag);

    let contract = TrackedContract {
        network_id,
        address,
        protocol: client.protocol(),
        last_filter_block: start,
        metadata,
        base_uri: None,
    };

    db.transaction(|conn| {
        ContractRepository::new(conn).insert(&contract)?;
        if let Some(metadata) = &contract.metadata {
            UserRepository::new(conn).find_or_create(&metadata.owner)?;
        }
        Ok(())
    })?;
    info!(
        "Tracking {} contract {:?} on network {} from block {}",
        contract.protocol, address, network_id, start
    );

    db.with_conn(|conn| ContractRepository::new(conn).find(network_id, &address))?
        .ok_or_else(|| anyhow!("{:?} vanished right after being tracked", address))
}

/// Drives ingestion for one tracked contract.
pub struct Poller {
    client: Arc<dyn ContractClient>,
    db: Database,
    cursor: CursorStore,
    cache: TxDedupCache,
    store: Arc<dyn ProcessedTxStore>,
    config: PollerConfig,
    ctx: HandlerContext,
    last_purge: Option<Instant>,
}

impl Poller {
    pub async fn init(
        client: Arc<dyn ContractClient>,
        db: Database,
        store: Arc<dyn ProcessedTxStore>,
        config: PollerConfig,
    ) -> Result<Self> {
        let contract = ensure_tracked(client.as_ref(), &db, &config).await?;

        let ctx = HandlerContext {
            network_id: contract.network_id,
            contract: contract.address,
            protocol: contract.protocol,
        };

        let mut poller = Poller {
            cursor: CursorStore::new(db.clone()),
            cache: TxDedupCache::new(store.clone(), config.dedup_capacity),
            client,
            db,
            store,
            config,
            ctx,
            last_purge: None,
        };
        poller.purge_expired();
        let primed = poller.cache.load_from_store(&contract.address)?;
        info!(
            "Poller ready for {:?} at block {} ({} cached transactions)",
            contract.address, contract.last_filter_block, primed
        );
        Ok(poller)
    }

    pub fn context(&self) -> HandlerContext {
        self.ctx
    }

    pub fn cached_transactions(&self) -> usize {
        self.cache.len()
    }

    /// One scan-and-apply cycle. The cursor only moves when every event type
    /// of the window has been fetched and applied.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let started = Instant::now();
        self.purge_if_due();

        let pause = self.config.retry_pause;
        let head = retry_with_pause(pause, "block_number", || self.client.block_number()).await?;
        let head = head.saturating_sub(self.config.confirmations);

        let last = self
            .cursor
            .load(self.ctx.network_id, &self.ctx.contract)?
            .ok_or_else(|| anyhow!("{:?} is not tracked", self.ctx.contract))?;
        let window = scan_window(last, head, self.config.window);

        let mut report = TickReport {
            window,
            applied: 0,
            skipped: 0,
        };
        if window.is_empty() {
            debug!(head, cursor = last, "Nothing new to scan");
            return Ok(report);
        }

        for kind in EventKind::ordered_for(self.ctx.protocol) {
            let logs = retry_with_pause(pause, kind.name(), || {
                self.client.query_filter(*kind, window.from, window.to)
            })
            .await?;

            for log in logs {
                let key = log.dedup_key();
                if self.cache.has(&key)? {
                    debug!(key, event = kind.name(), "Skipping already applied log");
                    report.skipped += 1;
                    continue;
                }

                retry_with_pause(pause, kind.name(), || self.apply(&log, &key))
                    .await
                    .with_context(|| {
                        format!(
                            "{} in tx {:?} (block {}, log {})",
                            kind.name(),
                            log.transaction_hash,
                            log.block_number,
                            log.log_index
                        )
                    })?;
                self.cache.remember(&key)?;
                report.applied += 1;
            }
        }

        self.cursor
            .advance(self.ctx.network_id, &self.ctx.contract, window.to)?;

        let elapsed = started.elapsed();
        info!(
            "Scanned blocks {}-{}: {} applied, {} skipped in {:?}",
            window.from, window.to, report.applied, report.skipped, elapsed
        );
        self.record(
            "timing",
            &format!(
                "{:?} blocks {}-{} applied {} in {}ms",
                self.ctx.contract,
                window.from,
                window.to,
                report.applied,
                elapsed.as_millis()
            ),
        );

        Ok(report)
    }

    /// Ticks until `cancel` fires, sleeping `interval` after each tick.
    pub async fn run(mut self, cancel: CancellationToken) {
        let span = info_span!(
            "poller",
            network_id = self.ctx.network_id,
            contract = %self.ctx.contract,
            protocol = %self.ctx.protocol
        );

        async move {
            info!("Poller started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = self.tick() => {
                        if let Err(e) = result {
                            self.report_failure(&e);
                        }
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(self.config.interval) => {}
                }
            }
            info!("Poller stopped");
        }
        .instrument(span)
        .await
    }

    /// Applies one log and records its dedup key in the same transaction, so
    /// a tick dropped mid-apply never leaves a committed but unrecorded event.
    async fn apply(&self, log: &DecodedLog, key: &str) -> Result<()> {
        let db = self.db.clone();
        let store = self.cache.store();
        let ctx = self.ctx;
        let event = log.event.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            db.transaction(|conn| {
                handlers::apply(conn, &ctx, &event)?;
                store.insert_within(conn, &ctx.contract, &key)
            })
        })
        .await?
    }

    fn report_failure(&self, e: &anyhow::Error) {
        error!(kind = classify(e), "Tick failed, cursor not advanced: {e:#}");
        self.record(
            "error",
            &format!(
                "{:?} on network {}: {e:#}",
                self.ctx.contract, self.ctx.network_id
            ),
        );
    }

    fn record(&self, kind: &str, content: &str) {
        if let Err(e) = self
            .db
            .with_conn(|conn| LogRepository::new(conn).record(kind, content))
        {
            warn!("Failed to write ingest log entry: {e:#}");
        }
    }

    fn purge_if_due(&mut self) {
        if self
            .last_purge
            .is_some_and(|at| at.elapsed() < PURGE_EVERY)
        {
            return;
        }
        self.purge_expired();
    }

    fn purge_expired(&mut self) {
        self.last_purge = Some(Instant::now());

        match self.store.purge_expired() {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged expired processed transactions"),
            Err(e) => warn!("Failed to purge processed transactions: {e:#}"),
        }

        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or(chrono::Duration::days(7));
        let cutoff = Utc::now() - retention;
        if let Err(e) = self
            .db
            .with_conn(|conn| LogRepository::new(conn).purge_older_than(cutoff))
        {
            warn!("Failed to purge ingest log: {e:#}");
        }
    }
}
