//! Balance enrichment loop.
//!
//! Each cycle selects canonical wallets that were never checked or have gone
//! stale, asks the configured providers for their balances in bounded
//! batches, and writes the results back. Per wallet:
//! `Unchecked → Checking → {Resolved, Failed}`, with resolved wallets
//! becoming due again after `stale_after`.
//!
//! Provider calls run concurrently within a batch; storage writes happen one
//! at a time after the batch, each conditional on the wallet's
//! `check_version` so overlapping runs cannot clobber each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dumpsift_providers::{Balance, BalanceProvider, ProviderError, ProviderSet, TtlCache};
use dumpsift_shared::{ChainType, EnrichmentConfig, Heartbeat, Result, Shutdown};
use dumpsift_storage::{BalanceUpdate, Storage, WalletCheck};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub selected: usize,
    pub resolved: usize,
    /// Resolved with a positive balance.
    pub funded: usize,
    pub failed: usize,
    /// Balance writes dropped because another writer got there first.
    pub lost_races: usize,
    pub cache_hits: usize,
}

pub struct BalanceEnricher {
    config: EnrichmentConfig,
    storage: Arc<Storage>,
    providers: ProviderSet,
    balance_cache: TtlCache<(ChainType, String), Balance>,
    price_cache: TtlCache<ChainType, f64>,
}

impl BalanceEnricher {
    pub fn new(config: EnrichmentConfig, storage: Arc<Storage>, providers: ProviderSet) -> Self {
        Self {
            balance_cache: TtlCache::new(config.balance_ttl),
            price_cache: TtlCache::new(config.price_ttl),
            config,
            storage,
            providers,
        }
    }

    /// Run cycles every `interval` until shutdown is requested. A running
    /// batch is always finished first.
    #[instrument(skip_all)]
    pub async fn run(&mut self, shutdown: Shutdown, heartbeat: Heartbeat) -> Result<()> {
        let chains = self.providers.chains();
        info!(
            chains = ?chains.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            interval_secs = self.config.interval.as_secs(),
            "enrichment loop started"
        );
        if chains.is_empty() {
            warn!("no balance providers configured; nothing will be checked");
        }

        loop {
            heartbeat.beat().await;
            if shutdown.is_requested() {
                break;
            }
            match self.run_cycle(&shutdown, &heartbeat).await {
                Ok(report) if report.selected > 0 => info!(
                    selected = report.selected,
                    resolved = report.resolved,
                    funded = report.funded,
                    failed = report.failed,
                    lost_races = report.lost_races,
                    cache_hits = report.cache_hits,
                    "enrichment cycle finished"
                ),
                Ok(_) => debug!("no wallets due"),
                Err(e) => warn!(error = %e, "enrichment cycle failed"),
            }
            if shutdown.idle(self.config.interval, &heartbeat).await {
                break;
            }
        }

        info!("enrichment loop stopped");
        Ok(())
    }

    /// One selection-and-check pass.
    pub async fn run_cycle(
        &mut self,
        shutdown: &Shutdown,
        heartbeat: &Heartbeat,
    ) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let chains = self.providers.chains();
        if chains.is_empty() {
            return Ok(report);
        }

        let stale_for =
            chrono::Duration::from_std(self.config.stale_after).unwrap_or(chrono::Duration::MAX);
        let stale_before = Utc::now()
            .checked_sub_signed(stale_for)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let due = self
            .storage
            .wallets_due_for_check(&chains, stale_before, self.config.cycle_limit)
            .await?;
        report.selected = due.len();

        for (i, batch) in due.chunks(self.config.batch_width).enumerate() {
            if i > 0 && shutdown.idle(self.config.batch_pause, heartbeat).await {
                debug!(remaining = due.len() - i * self.config.batch_width, "cycle cut short");
                break;
            }
            let results = self.check_batch(batch, &mut report).await;
            self.write_results(results, &mut report).await?;
            heartbeat.beat().await;
        }

        self.balance_cache.purge();
        self.price_cache.purge();
        Ok(report)
    }

    /// Resolve one batch. Cached balances are answered without a task; the
    /// rest run concurrently, one task per distinct address.
    #[instrument(skip_all, fields(wallets = batch.len()))]
    async fn check_batch(
        &mut self,
        batch: &[WalletCheck],
        report: &mut CycleReport,
    ) -> Vec<(WalletCheck, std::result::Result<Balance, String>)> {
        let mut slots: Vec<Option<std::result::Result<Balance, String>>> = vec![None; batch.len()];
        let mut waiting: HashMap<(ChainType, String), Vec<usize>> = HashMap::new();
        let mut tasks = JoinSet::new();

        for (idx, wallet) in batch.iter().enumerate() {
            let key = cache_key(wallet);
            if let Some(balance) = self.balance_cache.get(&key) {
                report.cache_hits += 1;
                slots[idx] = Some(Ok(balance));
                continue;
            }
            if let Some(sharing) = waiting.get_mut(&key) {
                sharing.push(idx);
                continue;
            }
            waiting.insert(key.clone(), vec![idx]);

            let providers = self.providers.providers_for(wallet.chain).to_vec();
            let address = wallet.address.clone();
            let timeout = self.config.request_timeout;
            tasks.spawn(async move {
                let result = lookup(&providers, key.0, &address, timeout).await;
                (key, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, result)) => {
                    if let Ok(balance) = &result {
                        self.balance_cache.insert(key.clone(), *balance);
                    }
                    for idx in waiting.remove(&key).unwrap_or_default() {
                        slots[idx] = Some(result.clone());
                    }
                }
                Err(e) => warn!(error = %e, "balance task failed"),
            }
        }

        batch
            .iter()
            .cloned()
            .zip(slots)
            .map(|(wallet, slot)| {
                let result = slot.unwrap_or_else(|| Err("balance task failed".to_string()));
                (wallet, result)
            })
            .collect()
    }

    async fn write_results(
        &mut self,
        results: Vec<(WalletCheck, std::result::Result<Balance, String>)>,
        report: &mut CycleReport,
    ) -> Result<()> {
        for (wallet, result) in results {
            match result {
                Ok(balance) => {
                    let balance_usd = if balance.is_positive() {
                        self.usd_price(wallet.chain).await.map(|p| p * balance.as_coins())
                    } else {
                        Some(0.0)
                    };
                    let update = BalanceUpdate {
                        balance: balance.as_coins(),
                        balance_raw: balance.raw.to_string(),
                        balance_usd,
                        checked_at: Utc::now(),
                    };
                    let written = self
                        .storage
                        .record_balance(&wallet.id, wallet.check_version, &update)
                        .await?;
                    if written {
                        report.resolved += 1;
                        if balance.is_positive() {
                            report.funded += 1;
                            info!(
                                wallet = %wallet.id,
                                chain = wallet.chain.as_str(),
                                balance = update.balance,
                                usd = ?update.balance_usd,
                                "funded wallet"
                            );
                        }
                    } else {
                        report.lost_races += 1;
                        warn!(wallet = %wallet.id, "balance changed concurrently, write skipped");
                    }
                }
                Err(error) => {
                    report.failed += 1;
                    debug!(wallet = %wallet.id, error = %error, "balance check failed");
                    self.storage
                        .record_check_failure(&wallet.id, &error, Utc::now())
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// USD price for one coin of `chain`, through the price cache.
    async fn usd_price(&mut self, chain: ChainType) -> Option<f64> {
        if let Some(price) = self.price_cache.get(&chain) {
            return Some(price);
        }
        let provider = self.providers.price()?;
        let fetched = tokio::time::timeout(
            self.config.request_timeout,
            provider.usd_price(chain.symbol()),
        )
        .await;
        match fetched {
            Ok(Ok(price)) => {
                self.price_cache.insert(chain, price);
                Some(price)
            }
            Ok(Err(e)) => {
                debug!(provider = provider.name(), chain = chain.as_str(), error = %e, "no price");
                None
            }
            Err(_) => {
                debug!(provider = provider.name(), chain = chain.as_str(), "price lookup timed out");
                None
            }
        }
    }
}

fn cache_key(wallet: &WalletCheck) -> (ChainType, String) {
    let address = if wallet.chain.is_evm() {
        wallet.address.to_lowercase()
    } else {
        wallet.address.clone()
    };
    (wallet.chain, address)
}

/// Try each provider in order. `NotFound` is a definitive zero; anything
/// else falls through to the next provider.
async fn lookup(
    providers: &[Arc<dyn BalanceProvider>],
    chain: ChainType,
    address: &str,
    timeout: Duration,
) -> std::result::Result<Balance, String> {
    let mut errors = Vec::new();
    for provider in providers {
        match tokio::time::timeout(timeout, provider.balance(chain, address)).await {
            Ok(Ok(balance)) => return Ok(balance),
            Ok(Err(ProviderError::NotFound)) => return Ok(Balance::zero(chain)),
            Ok(Err(e)) => errors.push(format!("{}: {e}", provider.name())),
            Err(_) => errors.push(format!("{}: {}", provider.name(), ProviderError::Timeout)),
        }
    }
    if errors.is_empty() {
        Err(format!("no provider for {}", chain.as_str()))
    } else {
        Err(errors.join("; "))
    }
}
